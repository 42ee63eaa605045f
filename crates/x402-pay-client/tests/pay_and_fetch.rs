use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use alloy::primitives::{Address, U256};

use x402::{
    decode_proof, ChallengeRequirement, PaymentReceipt, PaymentRequiredBody, PaymentSigner,
    ProofSigner, ProofVerifier, RequirementIssuer, PAYMENT_HEADER, PAYMENT_RESPONSE_HEADER,
};
use x402_client::{X402Client, X402Error};

const PRICE: u64 = 50_000_000_000_000;

struct Mock {
    issuer: RequirementIssuer,
    verifier: ProofVerifier,
    receiver: Address,
    hits: AtomicUsize,
}

fn challenge(mock: &Mock, resource: &str, message: &str) -> HttpResponse {
    match mock
        .issuer
        .issue(resource, U256::from(PRICE), mock.receiver)
    {
        Ok(req) => HttpResponse::PaymentRequired().json(PaymentRequiredBody::new(req, message)),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

async fn paid(req: HttpRequest, mock: web::Data<Mock>) -> HttpResponse {
    mock.hits.fetch_add(1, Ordering::SeqCst);
    let resource = req.path().to_string();
    let Some(header) = req.headers().get(PAYMENT_HEADER).and_then(|v| v.to_str().ok()) else {
        return challenge(&mock, &resource, "payment required");
    };
    let Ok(proof) = decode_proof(header) else {
        return HttpResponse::BadRequest().json(serde_json::json!({"error": "invalid_payment_header"}));
    };
    let result = match mock.verifier.verify(&proof, &resource, U256::from(PRICE)) {
        Ok(r) => r,
        Err(e) => return HttpResponse::BadRequest().body(e.to_string()),
    };
    match result.signer.filter(|_| result.valid) {
        Some(payer) => {
            let receipt = PaymentReceipt {
                payer,
                amount: proof.amount.clone(),
                service: resource,
            };
            HttpResponse::Ok()
                .insert_header((PAYMENT_RESPONSE_HEADER, receipt.encode().unwrap()))
                .json(serde_json::json!({"score": 42}))
        }
        None => challenge(&mock, &resource, result.reason.as_deref().unwrap_or("rejected")),
    }
}

async fn bare_challenge(req: HttpRequest, mock: web::Data<Mock>) -> HttpResponse {
    if req.headers().contains_key(PAYMENT_HEADER) {
        return paid(req, mock).await;
    }
    mock.hits.fetch_add(1, Ordering::SeqCst);
    let bare = ChallengeRequirement {
        amount: PRICE.to_string(),
        receiver: mock.receiver,
        resource: None,
        currency: None,
        network: None,
        chain_id: None,
        nonce: None,
        expiry: None,
    };
    HttpResponse::PaymentRequired().json(bare)
}

async fn always_402(req: HttpRequest, mock: web::Data<Mock>) -> HttpResponse {
    mock.hits.fetch_add(1, Ordering::SeqCst);
    challenge(&mock, req.path(), "nonce already used")
}

async fn free() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok"}))
}

async fn start() -> (SocketAddr, web::Data<Mock>) {
    let mock = web::Data::new(Mock {
        issuer: RequirementIssuer::new(),
        verifier: ProofVerifier::new(),
        receiver: Address::repeat_byte(0x42),
        hits: AtomicUsize::new(0),
    });
    let data = mock.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .route("/paid", web::get().to(paid))
            .route("/bare", web::get().to(bare_challenge))
            .route("/always-402", web::get().to(always_402))
            .route("/free", web::get().to(free))
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();
    let addr = server.addrs()[0];
    actix_rt::spawn(server.run());
    (addr, mock)
}

#[actix_rt::test]
async fn test_pays_challenge_and_retries_once() {
    let (addr, mock) = start().await;
    let signer = PaymentSigner::random();
    let payer = signer.address();
    let client = X402Client::new(signer).unwrap();

    let resp = client
        .pay_and_fetch(&format!("http://{addr}/paid"))
        .await
        .unwrap();

    assert!(resp.paid);
    assert_eq!(resp.status, 200);
    assert_eq!(resp.data["score"], 42);
    assert_eq!(resp.amount_paid.as_deref(), Some("50000000000000"));
    let receipt = resp.receipt.unwrap();
    assert_eq!(receipt.payer, payer);
    assert_eq!(receipt.service, "/paid");
    assert_eq!(mock.hits.load(Ordering::SeqCst), 2);
}

#[actix_rt::test]
async fn test_non_402_returned_unpaid() {
    let (addr, _) = start().await;
    let client = X402Client::new(PaymentSigner::random()).unwrap();

    let resp = client
        .pay_and_fetch(&format!("http://{addr}/free"))
        .await
        .unwrap();
    assert!(!resp.paid);
    assert!(resp.amount_paid.is_none());
    assert_eq!(resp.data["status"], "ok");
}

#[actix_rt::test]
async fn test_bare_challenge_defaults_resource_to_path() {
    let (addr, _) = start().await;
    let client = X402Client::new(PaymentSigner::random()).unwrap();

    let resp = client
        .pay_and_fetch(&format!("http://{addr}/bare?target=0xabc"))
        .await
        .unwrap();
    assert!(resp.paid);
    assert_eq!(resp.receipt.unwrap().service, "/bare");
}

#[actix_rt::test]
async fn test_failed_retry_is_terminal() {
    let (addr, mock) = start().await;
    let client = X402Client::new(PaymentSigner::random()).unwrap();

    let err = client
        .pay_and_fetch(&format!("http://{addr}/always-402"))
        .await
        .unwrap_err();
    match err {
        X402Error::PaymentRejected { status, reason } => {
            assert_eq!(status, 402);
            assert_eq!(reason, "nonce already used");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(mock.hits.load(Ordering::SeqCst), 2);
}

#[actix_rt::test]
async fn test_max_amount_refuses_to_sign() {
    let (addr, mock) = start().await;
    let client = X402Client::new(PaymentSigner::random())
        .unwrap()
        .with_max_amount(U256::from(PRICE - 1));

    let err = client
        .pay_and_fetch(&format!("http://{addr}/paid"))
        .await
        .unwrap_err();
    assert!(matches!(err, X402Error::AuthorizationError(_)));
    assert_eq!(mock.hits.load(Ordering::SeqCst), 1);
}
