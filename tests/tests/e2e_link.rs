//! Linking mixed-implementation nodes through a session.

#![cfg(unix)]

use interlink_core::{link, HarnessError, NodeKind, Session};
use interlink_integration_tests::{init_tracing, repl_log, Fixture, TestResult};

async fn mixed_pair(fixture: &Fixture) -> TestResult<Session> {
    let mut alloc = fixture.allocator()?;
    let mut session = Session::new();
    session
        .create(NodeKind::Epoch, &mut alloc, &fixture.config, fixture.epoch_build())
        .await?;
    session
        .create(NodeKind::Elixir, &mut alloc, &fixture.config, fixture.elixir_build())
        .await?;
    Ok(session)
}

#[tokio::test]
async fn epoch_and_elixir_link_both_ways() -> TestResult<()> {
    init_tracing();
    let fixture = Fixture::new()?;
    let mut session = mixed_pair(&fixture).await?;

    // Epoch owns ports 8000..=8004, so the elixir node syncs on 8005.
    session.link(0, 1).await?;
    session.link(1, 0).await?;

    let epoch_sent = repl_log(fixture.epoch_build())?;
    assert!(epoch_sent.contains(
        &"aec_peers:add_and_ping_peers([#{ host => <<\"localhost\">>, port => 8005, pubkey => <<9,8,7>> }])."
            .to_string()
    ));
    let elixir_sent = repl_log(fixture.elixir_build())?;
    assert!(elixir_sent.contains(
        &"Peers.try_connect(%{host: 'localhost', port: 8000, pubkey: <<1,2,3>>})".to_string()
    ));

    session.shutdown_all().await;
    Ok(())
}

#[tokio::test]
async fn link_works_on_bare_handles() -> TestResult<()> {
    let fixture = Fixture::new()?;
    let mut alloc = fixture.allocator()?;
    let mut a = NodeKind::Elixir
        .spawn(&mut alloc, &fixture.config, fixture.elixir_build())
        .await?;
    let mut b = NodeKind::Epoch
        .spawn(&mut alloc, &fixture.config, fixture.epoch_build())
        .await?;

    link(a.as_mut(), b.as_mut()).await?;
    assert!(repl_log(fixture.elixir_build())?
        .iter()
        .any(|l| l.contains("port: 8001") && l.contains("<<1,2,3>>")));

    a.repl().shutdown().await?;
    b.repl().shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn link_to_all_skips_the_source() -> TestResult<()> {
    init_tracing();
    let fixture = Fixture::new()?;
    let mut alloc = fixture.allocator()?;
    let mut session = Session::new();
    for kind in [NodeKind::Elixir, NodeKind::Epoch, NodeKind::Elixir] {
        let build = kind.default_build_path(&fixture.config);
        session.create(kind, &mut alloc, &fixture.config, &build).await?;
    }

    assert_eq!(session.link_to_all(1).await?, 2);

    let epoch_sent = repl_log(fixture.epoch_build())?;
    let links: Vec<_> = epoch_sent
        .iter()
        .filter(|l| l.starts_with("aec_peers:add_and_ping_peers"))
        .collect();
    assert_eq!(links.len(), 2);
    // Elixir nodes sync on 8000 and 8006, in session order.
    assert!(links[0].contains("port => 8000"));
    assert!(links[1].contains("port => 8006"));

    session.shutdown_all().await;
    Ok(())
}

#[tokio::test]
async fn describe_all_reports_every_node() -> TestResult<()> {
    let fixture = Fixture::new()?;
    let mut session = mixed_pair(&fixture).await?;

    let lines = session.describe_all().await?;
    assert_eq!(lines.len(), 2);
    let epoch_dir = fixture.nodes_dir().join("epoch-node-00001");
    assert_eq!(
        lines[0],
        format!(
            "Epoch, logs: {}, addr: (localhost, 8000), peer_pub: <<1,2,3>>, sign_pub: <<4,5,6>>",
            epoch_dir.display()
        )
    );
    assert!(lines[1].starts_with("Elixir, logs: "));
    assert!(lines[1].ends_with("addr: (localhost, 8005), peer_pub: <<9,8,7>>, sign_pub: <<6,6>>"));

    session.shutdown_all().await;
    Ok(())
}

#[tokio::test]
async fn invalid_selections_are_rejected() -> TestResult<()> {
    let fixture = Fixture::new()?;
    let mut session = mixed_pair(&fixture).await?;

    let err = session.link(0, 0).await.unwrap_err();
    assert!(matches!(err, HarnessError::InvalidSelection(_)));
    let err = session.link(0, 2).await.unwrap_err();
    assert!(matches!(err, HarnessError::InvalidSelection(_)));
    let err = session.link_to_all(5).await.unwrap_err();
    assert!(matches!(err, HarnessError::InvalidSelection(_)));

    // Nothing was sent for the rejected links.
    assert!(!repl_log(fixture.epoch_build())
        .unwrap_or_default()
        .iter()
        .any(|l| l.starts_with("aec_peers:add_and_ping_peers")));

    session.shutdown_all().await;
    Ok(())
}

#[tokio::test]
async fn a_single_node_links_to_nobody() -> TestResult<()> {
    let fixture = Fixture::new()?;
    let mut alloc = fixture.allocator()?;
    let mut session = Session::new();
    session
        .create(NodeKind::Epoch, &mut alloc, &fixture.config, fixture.epoch_build())
        .await?;

    assert_eq!(session.link_to_all(0).await?, 0);

    session.shutdown_all().await;
    Ok(())
}
