mod cli;
mod config;
mod server;

pub fn main() {
    cli::exec();
}
