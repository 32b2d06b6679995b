use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;

use crate::error::StoreError;
use crate::token::AccessTokenRecord;

/// Default name of the secondary index keyed on `repoID`.
pub const DEFAULT_REPO_INDEX: &str = "repoIDIndex";

/// Read access to the personal access token table.
#[async_trait]
pub trait TokenStore: Send + Sync + 'static {
    /// All token records issued for `repo_id`, expired ones included.
    async fn records_for_repo(&self, repo_id: &str) -> Result<Vec<AccessTokenRecord>, StoreError>;
}

/// Token table hosted in DynamoDB.
#[derive(Clone, Debug)]
pub struct DynamoTokenStore {
    client: Client,
    table_name: String,
    index_name: String,
}

impl DynamoTokenStore {
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
            index_name: DEFAULT_REPO_INDEX.to_string(),
        }
    }

    pub fn with_index(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = index_name.into();
        self
    }
}

#[async_trait]
impl TokenStore for DynamoTokenStore {
    async fn records_for_repo(&self, repo_id: &str) -> Result<Vec<AccessTokenRecord>, StoreError> {
        log::debug!(
            "Finding tokens for {} on table {}",
            repo_id,
            self.table_name
        );

        let mut records = Vec::new();
        let mut start_key = None;
        loop {
            let output = self
                .client
                .query()
                .table_name(&self.table_name)
                .index_name(&self.index_name)
                .key_condition_expression("#repo = :repo")
                .expression_attribute_names("#repo", "repoID")
                .expression_attribute_values(":repo", AttributeValue::S(repo_id.to_string()))
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .map_err(|e| StoreError::Query(format!("{e:?}")))?;

            for item in output.items() {
                let record = AccessTokenRecord::try_from(item).map_err(StoreError::Parse)?;
                records.push(record);
            }

            match output.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use aws_sdk_dynamodb::config::{BehaviorVersion, Credentials, Region};
    use serde_json::{json, Value};

    use super::*;
    use crate::testing::spawn_aws_endpoint;

    fn client(endpoint: &str) -> Client {
        let config = aws_sdk_dynamodb::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new("test", "test", None, None, "test"))
            .endpoint_url(endpoint)
            .build();
        Client::from_conf(config)
    }

    fn item(id: &str, username: &str) -> Value {
        json!({
            "id": { "S": id },
            "token": { "S": "a21zOnNlY3JldA==" },
            "repoID": { "S": "r1" },
            "username": { "S": username },
            "expiration": { "N": "1700000000" },
        })
    }

    #[tokio::test]
    async fn test_query_follows_every_page() {
        let (endpoint, calls) = spawn_aws_endpoint(|call| {
            if call.body.get("ExclusiveStartKey").is_none() {
                json!({
                    "Count": 1,
                    "Items": [item("t1", "alice")],
                    "LastEvaluatedKey": { "id": { "S": "t1" }, "repoID": { "S": "r1" } },
                })
            } else {
                json!({ "Count": 1, "Items": [item("t2", "bob")] })
            }
        })
        .await;

        let store = DynamoTokenStore::new(client(&endpoint), "tokens");
        let records = store.records_for_repo("r1").await.unwrap();

        let usernames: Vec<_> = records.iter().map(|r| r.username.as_str()).collect();
        assert_eq!(usernames, ["alice", "bob"]);

        let calls = calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        for call in &calls {
            assert_eq!(call.target, "DynamoDB_20120810.Query");
            assert_eq!(call.body["TableName"], "tokens");
            assert_eq!(call.body["IndexName"], DEFAULT_REPO_INDEX);
            assert_eq!(call.body["KeyConditionExpression"], "#repo = :repo");
            assert_eq!(call.body["ExpressionAttributeNames"], json!({ "#repo": "repoID" }));
            assert_eq!(
                call.body["ExpressionAttributeValues"],
                json!({ ":repo": { "S": "r1" } })
            );
        }
        assert!(calls[0].body.get("ExclusiveStartKey").is_none());
        assert_eq!(
            calls[1].body["ExclusiveStartKey"],
            json!({ "id": { "S": "t1" }, "repoID": { "S": "r1" } })
        );
    }

    #[tokio::test]
    async fn test_custom_index_name() {
        let (endpoint, calls) =
            spawn_aws_endpoint(|_| json!({ "Count": 0, "Items": [] })).await;

        let store = DynamoTokenStore::new(client(&endpoint), "tokens").with_index("byRepo");
        assert!(store.records_for_repo("r1").await.unwrap().is_empty());
        assert_eq!(calls.lock().unwrap()[0].body["IndexName"], "byRepo");
    }

    #[tokio::test]
    async fn test_bad_item_is_a_parse_error() {
        let (endpoint, _) = spawn_aws_endpoint(|_| {
            json!({
                "Count": 1,
                "Items": [{ "repoID": { "S": "r1" }, "username": { "S": "alice" } }],
            })
        })
        .await;

        let store = DynamoTokenStore::new(client(&endpoint), "tokens");
        let err = store.records_for_repo("r1").await.unwrap_err();
        assert!(matches!(err, StoreError::Parse(_)), "{err:?}");
    }
}
