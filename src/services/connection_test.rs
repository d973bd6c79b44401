use super::*;

#[tokio::test]
async fn connect_registers_and_disconnect_removes() {
    let registry = ConnectionRegistry::new();
    let (handle, _rx) = registry.connect().await;
    assert_eq!(registry.count().await, 1);

    registry.disconnect(handle).await;
    assert_eq!(registry.count().await, 0);
}

#[tokio::test]
async fn disconnect_unknown_handle_is_noop() {
    let registry = ConnectionRegistry::new();
    let (handle, _rx) = registry.connect().await;
    registry.disconnect(handle).await;
    // Second disconnect of the same handle must not panic or underflow.
    registry.disconnect(handle).await;
    assert_eq!(registry.count().await, 0);
}

#[tokio::test]
async fn broadcast_reaches_every_connection() {
    let registry = ConnectionRegistry::new();
    let (_h1, mut rx1) = registry.connect().await;
    let (_h2, mut rx2) = registry.connect().await;

    registry.broadcast("hello").await;

    assert_eq!(rx1.recv().await.as_deref(), Some("hello"));
    assert_eq!(rx2.recv().await.as_deref(), Some("hello"));
}

#[tokio::test]
async fn broadcast_swallows_dead_receivers() {
    let registry = ConnectionRegistry::new();
    let (_h1, rx1) = registry.connect().await;
    let (_h2, mut rx2) = registry.connect().await;
    drop(rx1);

    // The dropped receiver's error is swallowed; the live one still gets it.
    registry.broadcast("ping").await;
    assert_eq!(rx2.recv().await.as_deref(), Some("ping"));
}

#[tokio::test]
async fn handles_are_unique() {
    let registry = ConnectionRegistry::new();
    let (h1, _rx1) = registry.connect().await;
    let (h2, _rx2) = registry.connect().await;
    assert_ne!(h1, h2);
    assert_eq!(registry.count().await, 2);
}
