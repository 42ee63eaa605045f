use alloy::primitives::U256;
use x402_client::{PaymentSigner, X402Client};

fn usage() -> ! {
    eprintln!("usage: x402-client <url>");
    eprintln!("env: EVM_PRIVATE_KEY (required), X402_MAX_AMOUNT (minor units, optional)");
    std::process::exit(2);
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let Some(url) = std::env::args().nth(1) else {
        usage();
    };

    let key = match std::env::var("EVM_PRIVATE_KEY") {
        Ok(k) => k,
        Err(_) => {
            eprintln!("EVM_PRIVATE_KEY must be set");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(&url, &key).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(url: &str, key: &str) -> Result<(), x402_client::X402Error> {
    let signer = PaymentSigner::from_private_key(key)?;
    tracing::info!(address = %signer.address(), "loaded signer");

    let mut client = X402Client::new(signer)?;
    if let Ok(max) = std::env::var("X402_MAX_AMOUNT") {
        let max: U256 = max.parse().map_err(|e| {
            x402_client::X402Error::ConfigError(format!("invalid X402_MAX_AMOUNT: {e}"))
        })?;
        client = client.with_max_amount(max);
    }

    let resp = client.pay_and_fetch(url).await?;
    println!("{}", serde_json::to_string_pretty(&resp)?);
    Ok(())
}
