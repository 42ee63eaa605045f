//! Drives a real server over HTTP with the paying client.

mod common;

use std::net::SocketAddr;

use actix_web::{web, App, HttpServer};
use x402::PaymentSigner;
use x402_client::{X402Client, X402Error};
use x402_server::{routes, AppState};

use common::*;

fn start(state: AppState) -> SocketAddr {
    let data = web::Data::new(state);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .configure(routes::configure)
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();
    let addr = server.addrs()[0];
    actix_rt::spawn(server.run());
    addr
}

#[actix_rt::test]
async fn test_client_pays_for_query() {
    let signer = PaymentSigner::random();
    let payer = signer.address();
    let ledger = sqlite_ledger();
    ledger.register_agent(payer, "scanner", QUERY_AMOUNT * 2).unwrap();
    let fx = fixture(ledger, test_config());
    let ledger = fx.state.ledger.clone();
    let addr = start(fx.state);

    let client = X402Client::new(signer).unwrap();
    let resp = client
        .pay_and_fetch(&format!("http://{addr}/api/query/security?target={TARGET}"))
        .await
        .unwrap();

    assert!(resp.paid);
    assert_eq!(resp.status, 200);
    assert_eq!(resp.amount_paid.as_deref(), Some("50000000000000"));
    assert_eq!(resp.data["data"]["result"]["risk"], "low");
    let receipt = resp.receipt.unwrap();
    assert_eq!(receipt.payer, payer);
    assert_eq!(receipt.service, "/api/query/security");

    let stats = ledger.stats(payer).unwrap();
    assert_eq!(stats.payment_count, 1);
    assert_eq!(stats.total_spent, QUERY_AMOUNT);
}

#[actix_rt::test]
async fn test_client_sees_budget_refusal_as_terminal() {
    let signer = PaymentSigner::random();
    let payer = signer.address();
    let ledger = sqlite_ledger();
    ledger.register_agent(payer, "scanner", QUERY_AMOUNT).unwrap();
    let fx = fixture(ledger, test_config());
    let ledger = fx.state.ledger.clone();
    let addr = start(fx.state);

    let client = X402Client::new(signer).unwrap();
    let url = format!("http://{addr}/api/query/security?target={TARGET}");
    assert!(client.pay_and_fetch(&url).await.unwrap().paid);

    let err = client.pay_and_fetch(&url).await.unwrap_err();
    match err {
        X402Error::PaymentRejected { status, reason } => {
            assert_eq!(status, 429);
            assert!(reason.contains("budget"), "{reason}");
        }
        other => panic!("expected PaymentRejected, got {other:?}"),
    }
    assert_eq!(ledger.payment_count().unwrap(), 1);
}

#[actix_rt::test]
async fn test_free_route_needs_no_payment() {
    let fx = fixture(sqlite_ledger(), test_config());
    let addr = start(fx.state);

    let client = X402Client::new(PaymentSigner::random()).unwrap();
    let resp = client
        .pay_and_fetch(&format!("http://{addr}/health"))
        .await
        .unwrap();
    assert!(!resp.paid);
    assert_eq!(resp.data["ledgerTier"], "authoritative");
}
