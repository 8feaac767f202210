use canopy_core::crypto::SigningKeypair;

use crate::*;

/// Each recipient gets the tx sealed to its own key, found by challenging
/// every known peer.
#[tokio::test]
async fn test_private_tx_reaches_each_recipient() -> Result<()> {
    let b = spawn_node(&[]).await?;
    let c = spawn_node(&[]).await?;
    let a = spawn_node(&[&b, &c]).await?;

    let mut tx = text_tx(ROOM, "psst");
    tx.recipients = vec![b.host.address(), c.host.address()];
    let hash = a.host.add_tx(&mut tx).await?;

    for node in [&b, &c] {
        let got = wait_for_tx(node, &hash).await?;
        assert_eq!(got.signer()?, a.host.address());
        assert_eq!(got.recipients, tx.recipients);
    }

    for node in [&a, &b, &c] {
        node.shutdown();
    }
    Ok(())
}

/// Peers that are not recipients never see the tx, even when subscribed to
/// its URL.
#[tokio::test]
async fn test_private_tx_is_not_broadcast() -> Result<()> {
    let b = spawn_node(&[]).await?;
    let c = spawn_node(&[]).await?;
    let a = spawn_node(&[&b, &c]).await?;
    let listener = spawn_node(&[&a]).await?;

    listener.host.subscribe(ROOM).await?;
    wait_for_subscribers(&a, ROOM, 1).await?;

    let mut tx = text_tx(ROOM, "for b only");
    tx.recipients = vec![b.host.address()];
    let hash = a.host.add_tx(&mut tx).await?;
    wait_for_tx(&b, &hash).await?;

    // the listener's subscription is live
    let marker = a.host.add_tx(&mut text_tx(ROOM, "public")).await?;
    wait_for_tx(&listener, &marker).await?;

    assert!(listener.store.get_tx(&hash).is_none());
    assert!(c.store.get_tx(&hash).is_none());

    for node in [&a, &b, &c, &listener] {
        node.shutdown();
    }
    Ok(())
}

/// An unreachable recipient is skipped: the submit still succeeds and the tx
/// is kept locally.
#[tokio::test]
async fn test_missing_recipient_is_skipped() -> Result<()> {
    let b = spawn_node(&[]).await?;
    let a = spawn_node(&[&b]).await?;

    let mut tx = text_tx(ROOM, "to nobody");
    tx.recipients = vec![SigningKeypair::generate().address()];
    let hash = a.host.add_tx(&mut tx).await?;

    assert!(a.store.get_tx(&hash).is_some());
    assert!(b.store.get_tx(&hash).is_none());

    a.shutdown();
    b.shutdown();
    Ok(())
}

/// Address lookup over TCP returns the peer that proves the address and the
/// encryption key it advertises.
#[tokio::test]
async fn test_peer_with_address_verifies_over_tcp() -> Result<()> {
    let b = spawn_node(&[]).await?;
    let c = spawn_node(&[]).await?;
    let a = spawn_node(&[&b, &c]).await?;

    let (peer, key) = a
        .host
        .peer_with_address(&c.host.address())
        .await
        .context("c should verify")?;
    assert_eq!(key, c.host.encrypting_public_key());
    assert_eq!(peer.address(), Some(c.host.address()));
    assert_eq!(peer.id(), c.local_addr().context("c listening")?.to_string());
    peer.close_conn().await?;

    let nobody = SigningKeypair::generate().address();
    assert!(a.host.peer_with_address(&nobody).await.is_none());

    for node in [&a, &b, &c] {
        node.shutdown();
    }
    Ok(())
}

/// Each private delivery is its own short-lived connection; once it closes
/// the recipient keeps no seen record for it.
#[tokio::test]
async fn test_private_deliveries_leave_no_seen_records() -> Result<()> {
    let b = spawn_node(&[]).await?;
    let a = spawn_node(&[&b]).await?;

    for i in 0..20 {
        let mut tx = text_tx(ROOM, &format!("secret {i}"));
        tx.recipients = vec![b.host.address()];
        let hash = a.host.add_tx(&mut tx).await?;
        wait_for_tx(&b, &hash).await?;
    }
    wait_until("closed connections forgotten", || b.host.seen().peer_count() == 0).await?;

    a.shutdown();
    b.shutdown();
    Ok(())
}
