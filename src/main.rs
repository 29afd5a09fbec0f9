use clap::Parser;

use reactor_httpd::{Config, Server};

fn main() {
    env_logger::init();

    let config = Config::parse();
    match Server::new(&config) {
        Ok(server) => server.run(),
        Err(e) => {
            log::error!("server init failed: {e}");
            std::process::exit(1);
        }
    }
}
