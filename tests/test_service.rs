//! Integration tests for the JSON request facade
//!
//! Tests cover:
//! - Role checks in front of mutating requests
//! - Routing queries over JSON lines
//! - Pausing and emergency mode through the service

use ethers::types::{Address, U256};
use mig_quote_sdk::auth::{Role, RoleAuthorizer};
use mig_quote_sdk::chain_reader::StaticChainReader;
use mig_quote_sdk::clock::ManualClock;
use mig_quote_sdk::pools::Pool;
use mig_quote_sdk::router::Path;
use mig_quote_sdk::service::{QuoteService, ServiceRequest, ServiceResponse};
use mig_quote_sdk::settings::Settings;
use mig_quote_sdk::v3_math::Q96;
use mig_quote_sdk::ErrorKind;
use serde_json::Value;
use std::sync::Arc;

fn addr(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

const ADMIN: u64 = 0xa1;
const OPERATOR: u64 = 0xa2;
const PAUSER: u64 = 0xa3;
const GUARDIAN: u64 = 0xa4;
const STRANGER: u64 = 0xa5;

fn service() -> QuoteService {
    let auth = RoleAuthorizer::new();
    auth.grant(Role::Admin, addr(ADMIN));
    auth.grant(Role::Operator, addr(OPERATOR));
    auth.grant(Role::Pauser, addr(PAUSER));
    auth.grant(Role::Emergency, addr(GUARDIAN));
    let reader = Arc::new(StaticChainReader::new());
    QuoteService::new(
        &Settings::default(),
        Some(reader.clone()),
        reader,
        Arc::new(auth),
        Arc::new(ManualClock::new(50_000)),
    )
}

fn pool(id: u64, a: u64, b: u64) -> Pool {
    Pool {
        id: addr(id),
        token_a: addr(a),
        token_b: addr(b),
        fee: 3000,
        liquidity: 1_000_000_000_000_000_000_000_000,
        sqrt_price_x96: Q96,
        tick: 0,
        last_update: 0,
    }
}

async fn call(svc: &QuoteService, caller: u64, request: ServiceRequest) -> ServiceResponse {
    let line = serde_json::to_string(&request).unwrap();
    let answer = svc.handle_json(addr(caller), &line).await;
    serde_json::from_str(&answer).unwrap()
}

fn result(response: ServiceResponse) -> Value {
    match response {
        ServiceResponse::Ok { result } => result,
        ServiceResponse::Error { kind, message } => panic!("{:?}: {}", kind, message),
    }
}

fn error_kind(response: ServiceResponse) -> ErrorKind {
    match response {
        ServiceResponse::Error { kind, .. } => kind,
        other => panic!("expected an error, got {:?}", other),
    }
}

/// Pools loaded by an operator are routable by anyone
#[tokio::test]
async fn test_route_over_json() {
    let svc = service();
    let upsert = |p| ServiceRequest::UpsertPool { pool: p };
    assert_eq!(
        error_kind(call(&svc, STRANGER, upsert(pool(0x10, 1, 2))).await),
        ErrorKind::Unauthorized
    );
    result(call(&svc, OPERATOR, upsert(pool(0x10, 1, 2))).await);
    result(call(&svc, OPERATOR, upsert(pool(0x20, 2, 3))).await);

    let found = result(
        call(
            &svc,
            STRANGER,
            ServiceRequest::FindOptimalPath {
                token_in: addr(1),
                token_out: addr(3),
                amount_in: U256::exp10(18),
                max_slippage_bps: None,
            },
        )
        .await,
    );
    let path: Path = serde_json::from_value(found).unwrap();
    assert!(path.is_valid);
    assert_eq!(path.tokens, vec![addr(1), addr(2), addr(3)]);

    let reachable = result(
        call(
            &svc,
            STRANGER,
            ServiceRequest::HasPath {
                token_a: addr(3),
                token_b: addr(1),
                max_hops: 2,
            },
        )
        .await,
    );
    assert_eq!(reachable, Value::Bool(true));

    let stored = result(call(&svc, STRANGER, ServiceRequest::GetPool { pool: addr(0x10) }).await);
    let stored: Pool = serde_json::from_value(stored).unwrap();
    assert_eq!(stored.last_update, 50_000);
}

/// Paused path finding refuses queries until a pauser resumes it
#[tokio::test]
async fn test_pause_through_service() {
    let svc = service();
    result(call(&svc, OPERATOR, ServiceRequest::UpsertPool { pool: pool(0x10, 1, 2) }).await);
    let query = || ServiceRequest::GetAmountOut {
        token_in: addr(1),
        token_out: addr(2),
        amount_in: U256::exp10(18),
    };

    assert_eq!(
        error_kind(call(&svc, OPERATOR, ServiceRequest::Pause).await),
        ErrorKind::Unauthorized
    );
    result(call(&svc, PAUSER, ServiceRequest::Pause).await);
    assert_eq!(error_kind(call(&svc, STRANGER, query()).await), ErrorKind::InvalidState);

    result(call(&svc, PAUSER, ServiceRequest::Unpause).await);
    let quoted = result(call(&svc, STRANGER, query()).await);
    assert!(quoted.get("amount_out").is_some());
    assert!(quoted.get("path").is_some());
}

/// Only the emergency role toggles emergency mode; the status is visible to everyone
#[tokio::test]
async fn test_emergency_mode_through_service() {
    let svc = service();
    let activate = || ServiceRequest::ActivateEmergencyMode {
        reason: "oracle outage".into(),
    };
    assert_eq!(
        error_kind(call(&svc, OPERATOR, activate()).await),
        ErrorKind::Unauthorized
    );
    result(call(&svc, GUARDIAN, activate()).await);
    assert_eq!(
        error_kind(call(&svc, GUARDIAN, activate()).await),
        ErrorKind::EmergencyModeActive
    );
    assert_eq!(
        error_kind(call(&svc, GUARDIAN, ServiceRequest::DeactivateEmergencyMode).await),
        ErrorKind::InvalidState
    );

    let stats = result(call(&svc, STRANGER, ServiceRequest::SystemStats).await);
    assert_eq!(stats["emergency_mode"], Value::Bool(true));
    assert_eq!(stats["status"], Value::String("emergency".into()));
    assert_eq!(stats["emergency_reason"], Value::String("oracle outage".into()));
}

/// Unknown methods are reported as invalid input
#[tokio::test]
async fn test_unknown_method() {
    let svc = service();
    let answer = svc
        .handle_json(addr(STRANGER), r#"{"method":"drain_everything"}"#)
        .await;
    let response: ServiceResponse = serde_json::from_str(&answer).unwrap();
    assert_eq!(error_kind(response), ErrorKind::InvalidInput);
}
