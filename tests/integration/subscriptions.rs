use canopy_services::HostError;

use crate::*;

#[tokio::test]
async fn test_subscribe_without_peers_fails() -> Result<()> {
    let a = spawn_node(&[]).await?;

    let err = a.host.subscribe(ROOM).await.unwrap_err();
    assert!(matches!(err, HostError::NoPeersForUrl(_)), "got {err}");
    assert!(!a.host.is_subscribed(ROOM));

    a.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_subscribe_skips_dead_peers() -> Result<()> {
    let a = spawn_node(&[]).await?;
    let dead = dead_addr().await?;
    let b = spawn_node_with(vec![
        dead.to_string(),
        a.local_addr().context("a listening")?.to_string(),
    ])
    .await?;

    b.host.subscribe(ROOM).await?;
    wait_for_subscribers(&a, ROOM, 1).await?;

    a.shutdown();
    b.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_subscribe_twice_is_rejected() -> Result<()> {
    let a = spawn_node(&[]).await?;
    let b = spawn_node(&[&a]).await?;

    b.host.subscribe(ROOM).await?;
    let err = b.host.subscribe(ROOM).await.unwrap_err();
    assert!(matches!(err, HostError::AlreadySubscribed(_)), "got {err}");

    wait_for_subscribers(&a, ROOM, 1).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(a.transport.subscriber_count(ROOM), 1);

    a.shutdown();
    b.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_unsubscribe_unknown_url() -> Result<()> {
    let a = spawn_node(&[]).await?;
    assert!(matches!(a.host.unsubscribe(ROOM), Err(HostError::NotSubscribed(_))));
    a.shutdown();
    Ok(())
}

/// When the provider goes away the subscription ends and can be
/// re-established elsewhere.
#[tokio::test]
async fn test_provider_shutdown_ends_subscription() -> Result<()> {
    let a = spawn_node(&[]).await?;
    let b = spawn_node(&[&a]).await?;

    b.host.subscribe(ROOM).await?;
    wait_for_subscribers(&a, ROOM, 1).await?;

    a.shutdown();
    wait_until("subscription to end", || !b.host.is_subscribed(ROOM)).await?;

    let a2 = spawn_node(&[]).await?;
    b.host.add_peer(&a2.local_addr().context("a2 listening")?.to_string()).await?;
    // the dead provider is still first in line; subscribe moves past it
    b.host.subscribe(ROOM).await?;
    wait_for_subscribers(&a2, ROOM, 1).await?;

    a2.shutdown();
    b.shutdown();
    Ok(())
}
