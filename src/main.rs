use std::process::exit;
use clap::App;
use rpki_client_rs::error::ExitError;
use rpki_client_rs::log;
use rpki_client_rs::operation::Orders;

fn run() -> Result<(), ExitError> {
    let app = App::new("rpki-client-rs")
        .version(env!("CARGO_PKG_VERSION"))
        .about("RPKI relying-party validator");
    let orders = Orders::from_args(app)?;
    log::init(orders.config())?;
    orders.run()
}

fn main() {
    exit(match run() {
        Ok(()) => 0,
        Err(err) => err.code(),
    });
}
