use crate::*;

/// A put from the provider lands in the subscriber's store, signed by the
/// provider.
#[tokio::test]
async fn test_put_reaches_subscriber() -> Result<()> {
    let a = spawn_node(&[]).await?;
    let b = spawn_node(&[&a]).await?;

    b.host.subscribe(ROOM).await?;
    wait_for_subscribers(&a, ROOM, 1).await?;

    let mut tx = text_tx(ROOM, "hello from a");
    let hash = a.host.add_tx(&mut tx).await?;

    let got = wait_for_tx(&b, &hash).await?;
    assert_eq!(got.url, ROOM);
    assert_eq!(got.patches, vec!["hello from a".to_string()]);
    assert_eq!(got.signer()?, a.host.address());

    a.shutdown();
    b.shutdown();
    Ok(())
}

/// A → B → C: B relays what it receives to its own subscribers.
#[tokio::test]
async fn test_relay_across_three_nodes() -> Result<()> {
    let a = spawn_node(&[]).await?;
    let b = spawn_node(&[&a]).await?;
    let c = spawn_node(&[&b]).await?;

    b.host.subscribe(ROOM).await?;
    c.host.subscribe(ROOM).await?;
    wait_for_subscribers(&a, ROOM, 1).await?;
    wait_for_subscribers(&b, ROOM, 1).await?;

    let hash = a.host.add_tx(&mut text_tx(ROOM, "relayed")).await?;

    wait_for_tx(&b, &hash).await?;
    let got = wait_for_tx(&c, &hash).await?;
    assert_eq!(got.signer()?, a.host.address());

    for node in [&a, &b, &c] {
        node.shutdown();
    }
    Ok(())
}

/// Only subscribers of the tx's URL receive it.
#[tokio::test]
async fn test_other_rooms_are_not_delivered() -> Result<()> {
    let a = spawn_node(&[]).await?;
    let b = spawn_node(&[&a]).await?;

    b.host.subscribe("chat/room2").await?;
    wait_for_subscribers(&a, "chat/room2", 1).await?;

    let hash = a.host.add_tx(&mut text_tx(ROOM, "not for b")).await?;
    let marker = a.host.add_tx(&mut text_tx("chat/room2", "for b")).await?;

    // room2 traffic arriving proves the earlier room1 tx was not just slow
    wait_for_tx(&b, &marker).await?;
    assert!(b.store.get_tx(&hash).is_none());

    a.shutdown();
    b.shutdown();
    Ok(())
}

/// After unsubscribing, the provider drops the subscriber and stops sending.
#[tokio::test]
async fn test_unsubscribe_stops_delivery() -> Result<()> {
    let a = spawn_node(&[]).await?;
    let b = spawn_node(&[&a]).await?;

    b.host.subscribe(ROOM).await?;
    wait_for_subscribers(&a, ROOM, 1).await?;

    b.host.unsubscribe(ROOM)?;
    assert!(!b.host.is_subscribed(ROOM));
    wait_for_subscribers(&a, ROOM, 0).await?;

    let hash = a.host.add_tx(&mut text_tx(ROOM, "too late")).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(b.store.get_tx(&hash).is_none());

    a.shutdown();
    b.shutdown();
    Ok(())
}
