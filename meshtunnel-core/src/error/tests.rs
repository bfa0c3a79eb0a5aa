//! Tests for error conversions and classification

use crate::error::{TunnelError, TunnelResult};
use std::time::Duration;

#[tokio::test]
async fn test_join_error_conversion() {
    async fn task_that_panics() -> Result<(), &'static str> {
        panic!("test panic");
    }

    async fn test_function() -> TunnelResult<()> {
        let handle = tokio::spawn(task_that_panics());
        let _result = handle.await?;
        Ok(())
    }

    match test_function().await {
        Err(TunnelError::Internal { message }) => assert!(message.contains("Task panicked")),
        other => panic!("Expected Internal error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_timeout_error_conversion() {
    async fn test_function() -> TunnelResult<()> {
        tokio::time::timeout(
            Duration::from_millis(1),
            tokio::time::sleep(Duration::from_secs(1)),
        )
        .await?;
        Ok(())
    }

    match test_function().await {
        Err(TunnelError::Timeout { operation, .. }) => assert_eq!(operation, "async_operation"),
        other => panic!("Expected Timeout error, got {:?}", other),
    }
}

#[test]
fn test_io_error_conversion() {
    fn read_missing() -> TunnelResult<Vec<u8>> {
        Ok(std::fs::read("/definitely/not/here/meshtunnel.key")?)
    }

    assert!(matches!(read_missing(), Err(TunnelError::Io(_))));
}

#[test]
fn test_prost_decode_error_is_protocol_error() {
    let err: TunnelError = prost::DecodeError::new("truncated").into();
    assert!(matches!(err, TunnelError::Protocol { .. }));
}

#[test]
fn test_fatal_classification() {
    assert!(TunnelError::configuration("agent", "missing key").is_fatal());
    assert!(!TunnelError::protocol("bad type").is_fatal());
}

#[test]
fn test_retryable_classification() {
    assert!(TunnelError::connect("peer", "relay unreachable").is_retryable());
    assert!(TunnelError::stream_open("peer", "no connection").is_retryable());
    assert!(!TunnelError::protocol("unexpected SUCCESS").is_retryable());

    let missing = TunnelError::resolution(
        "edge-1",
        TunnelError::AddressNotFound {
            node_name: "edge-1".to_string(),
        },
    );
    assert!(missing.is_retryable());

    let malformed = TunnelError::resolution("edge-1", TunnelError::decoding("edge-1", "garbage"));
    assert!(!malformed.is_retryable());
}
