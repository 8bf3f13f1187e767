//! Launch, query and teardown of single nodes against console stand-ins.

#![cfg(unix)]

use std::fs;
use std::time::Duration;

use interlink_core::node::{elixir, epoch};
use interlink_core::{
    ElixirNode, EpochNode, HarnessError, Node, NodeKind, Session, SyncEndpoint, DETACH_LINE,
};
use interlink_integration_tests::{
    init_tracing, repl_log, EpochScript, Fixture, IexScript, TestResult,
};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::test]
async fn epoch_node_prepares_its_working_directory() -> TestResult<()> {
    init_tracing();
    let fixture = Fixture::new()?;
    let mut alloc = fixture.allocator()?;

    let mut node = EpochNode::spawn(&mut alloc, &fixture.config, fixture.epoch_build()).await?;
    let dir = node.working_dir().to_path_buf();
    assert_eq!(dir, fixture.nodes_dir().join("epoch-node-00001"));
    assert_eq!(node.sync_endpoint(), SyncEndpoint::local(8000));
    assert_eq!(node.ports().channel_websocket, 8004);

    assert!(dir.join("data/aecore/keys").is_dir());
    let genesis = fs::read_to_string(dir.join("data/aecore/.genesis").join(epoch::GENESIS_FILE))?;
    assert_eq!(genesis, fs::read_to_string(&fixture.config.genesis_accounts_path)?);

    let conf = fs::read_to_string(node.conf_path())?;
    assert!(!conf.contains("CONF_"));
    assert!(conf.contains("8000"));
    assert!(conf.contains(&dir.to_string_lossy().into_owned()));

    // The launcher received the rendered file.
    let passed = fs::read_to_string(fixture.epoch_build().join("config.path"))?;
    assert_eq!(passed.trim(), node.conf_path().to_string_lossy());

    node.repl().shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn epoch_keys_are_normalized() -> TestResult<()> {
    init_tracing();
    let fixture = Fixture::new()?;
    let mut alloc = fixture.allocator()?;
    let mut node = NodeKind::Epoch
        .spawn(&mut alloc, &fixture.config, fixture.epoch_build())
        .await?;

    assert_eq!(node.signing_pubkey().await?, "<<4,5,6>>");
    assert_eq!(node.connection_pubkey().await?, "<<1,2,3>>");
    // Repeatable: the binding is released after every query.
    assert_eq!(node.signing_pubkey().await?, "<<4,5,6>>");

    let sent = repl_log(fixture.epoch_build())?;
    assert_eq!(
        &sent[..3],
        &[
            "{ok, Pub} = aec_keys:pubkey().",
            "erlang:display(Pub).",
            "f(Pub).",
        ]
    );
    assert!(sent.contains(&"{ok, Pub} = aec_keys:peer_pubkey().".to_string()));

    node.repl().shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn epoch_has_no_serialization_query() -> TestResult<()> {
    let fixture = Fixture::new()?;
    let mut alloc = fixture.allocator()?;
    let mut node = NodeKind::Epoch
        .spawn(&mut alloc, &fixture.config, fixture.epoch_build())
        .await?;

    let err = node.serialized_object("tx").await.unwrap_err();
    assert!(matches!(
        err,
        HarnessError::UnsupportedOperation { kind: "Epoch", operation: "serialized_object" }
    ));

    node.repl().shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn epoch_startup_timeout() -> TestResult<()> {
    init_tracing();
    let script = EpochScript {
        ready: false,
        ..Default::default()
    };
    let mut fixture = Fixture::with_scripts(&script, &IexScript::default())?;
    fixture.config.epoch.startup_timeout_ms = 300;
    let mut alloc = fixture.allocator()?;

    let err = EpochNode::spawn(&mut alloc, &fixture.config, fixture.epoch_build())
        .await
        .unwrap_err();
    match err {
        HarnessError::StartupTimeout { marker, after, .. } => {
            assert_eq!(marker, epoch::READY_MARKER);
            assert_eq!(after, Duration::from_millis(300));
        }
        other => panic!("expected startup timeout, got {other:?}"),
    }
    // Nothing of the half-started node stays behind.
    assert!(!fixture.nodes_dir().join("epoch-node-00001").exists());
    Ok(())
}

#[tokio::test]
async fn epoch_spawns_from_relative_build_dir() -> TestResult<()> {
    init_tracing();
    let fixture = Fixture::new()?;
    let local = tempfile::Builder::new()
        .prefix("epoch-build")
        .tempdir_in(".")?;
    assert!(local.path().is_relative());
    EpochScript::default().install(local.path())?;
    let mut alloc = fixture.allocator()?;

    let mut node = EpochNode::spawn(&mut alloc, &fixture.config, local.path()).await?;
    assert_eq!(node.connection_pubkey().await?, "<<1,2,3>>");
    assert!(local.path().join("repl.log").is_file());

    node.repl().shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn missing_epoch_build_dir_allocates_nothing() -> TestResult<()> {
    let fixture = Fixture::new()?;
    let mut alloc = fixture.allocator()?;

    let missing = fixture.root.path().join("no-epoch-here");
    let err = EpochNode::spawn(&mut alloc, &fixture.config, &missing)
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Io(_)));
    assert!(err.to_string().contains("no-epoch-here"), "{err}");
    assert_eq!(fs::read_dir(fixture.nodes_dir())?.count(), 0);
    Ok(())
}

#[tokio::test]
async fn epoch_rejects_unexpected_ack() -> TestResult<()> {
    let script = EpochScript {
        ack: "{error,not_connected}".into(),
        ..Default::default()
    };
    let fixture = Fixture::with_scripts(&script, &IexScript::default())?;
    let mut alloc = fixture.allocator()?;
    let mut node = NodeKind::Epoch
        .spawn(&mut alloc, &fixture.config, fixture.epoch_build())
        .await?;

    let err = node
        .connect_to(&SyncEndpoint::local(9000), "<<1,2>>")
        .await
        .unwrap_err();
    match err {
        HarnessError::ProtocolAssertion { expected, actual } => {
            assert_eq!(expected, epoch::ACK_TOKEN);
            assert_eq!(actual, "{error,not_connected}");
        }
        other => panic!("expected protocol assertion, got {other:?}"),
    }

    node.repl().shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn elixir_node_gets_its_environment() -> TestResult<()> {
    init_tracing();
    let fixture = Fixture::new()?;
    let mut alloc = fixture.allocator()?;
    // Burn one port and directory so the elixir node lands mid-sequence.
    alloc.allocate_port()?;
    alloc.allocate_directory("epoch")?;

    let mut node = NodeKind::Elixir
        .spawn(&mut alloc, &fixture.config, fixture.elixir_build())
        .await?;
    let dir = node.working_dir().to_path_buf();
    assert_eq!(dir, fixture.nodes_dir().join("elixir-node-00002"));
    assert_eq!(node.sync_endpoint().to_string(), "(localhost, 8001)");

    let env = fs::read_to_string(fixture.elixir_build().join("env.log"))?;
    for (key, value) in elixir::node_env(&dir, 8001) {
        assert!(
            env.contains(&format!("{key}={value}")),
            "{key} missing from child environment:\n{env}"
        );
    }
    // Set on the child only.
    assert!(std::env::var("SYNC_PORT").is_err());

    node.repl().shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn elixir_queries() -> TestResult<()> {
    init_tracing();
    let fixture = Fixture::new()?;
    let mut alloc = fixture.allocator()?;
    let mut node = NodeKind::Elixir
        .spawn(&mut alloc, &fixture.config, fixture.elixir_build())
        .await?;

    assert_eq!(node.connection_pubkey().await?, "<<9,8,7>>");
    assert_eq!(node.signing_pubkey().await?, "<<6,6>>");
    assert_eq!(node.serialized_object("tx").await?, "<<200,1,2>>");

    let sent = repl_log(fixture.elixir_build())?;
    assert!(sent.contains(&"{pub, _} = Keys.keypair(:sign)".to_string()));
    assert!(sent.contains(&"IO.inspect(pub, limit: :infinity)".to_string()));
    assert!(sent.contains(&"{:ok, serialized_obj} = Serialization.rlp_encode(tx)".to_string()));

    node.repl().shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn elixir_prompt_timeout() -> TestResult<()> {
    let iex = IexScript {
        prompts: false,
        ..Default::default()
    };
    let mut fixture = Fixture::with_scripts(&EpochScript::default(), &iex)?;
    fixture.config.elixir.prompt_timeout_ms = 200;
    let mut alloc = fixture.allocator()?;

    let err = ElixirNode::spawn(&mut alloc, &fixture.config, fixture.elixir_build())
        .await
        .unwrap_err();
    match err {
        HarnessError::StartupTimeout { marker, .. } => assert_eq!(marker, elixir::FIRST_PROMPT),
        other => panic!("expected startup timeout, got {other:?}"),
    }
    assert!(!fixture.nodes_dir().join("elixir-node-00001").exists());
    Ok(())
}

#[tokio::test]
async fn elixir_rejects_the_erlang_ack() -> TestResult<()> {
    let iex = IexScript {
        ack: "ok".into(),
        ..Default::default()
    };
    let fixture = Fixture::with_scripts(&EpochScript::default(), &iex)?;
    let mut alloc = fixture.allocator()?;
    let mut node = NodeKind::Elixir
        .spawn(&mut alloc, &fixture.config, fixture.elixir_build())
        .await?;

    let err = node
        .connect_to(&SyncEndpoint::local(9000), "<<1,2>>")
        .await
        .unwrap_err();
    match err {
        HarnessError::ProtocolAssertion { expected, actual } => {
            assert_eq!(expected, elixir::ACK_TOKEN);
            assert_eq!(actual, "ok");
        }
        other => panic!("expected protocol assertion, got {other:?}"),
    }

    node.repl().shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn missing_launcher_is_an_io_error() -> TestResult<()> {
    let mut fixture = Fixture::new()?;
    fixture.config.elixir.program = fixture
        .root
        .path()
        .join("bin/no-such-iex")
        .to_string_lossy()
        .into_owned();
    let mut alloc = fixture.allocator()?;

    let err = ElixirNode::spawn(&mut alloc, &fixture.config, fixture.elixir_build())
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Io(_)), "got {err:?}");
    assert!(err.to_string().contains("no-such-iex"), "{err}");
    assert!(!fixture.nodes_dir().join("elixir-node-00001").exists());
    Ok(())
}

#[tokio::test]
async fn interactive_hand_off_returns_on_detach() -> TestResult<()> {
    init_tracing();
    let fixture = Fixture::new()?;
    let mut alloc = fixture.allocator()?;
    let mut session = Session::new();
    let index = session
        .create(NodeKind::Epoch, &mut alloc, &fixture.config, fixture.epoch_build())
        .await?;

    let operator = format!("aec_sync:info().\n{DETACH_LINE}\nafter\n");
    let mut input = BufReader::new(operator.as_bytes()).lines();
    let mut out: Vec<u8> = Vec::new();
    session
        .interactive(index, &mut input, &mut out, "epoch> ")
        .await?;

    assert!(String::from_utf8_lossy(&out).contains("epoch> "));
    assert_eq!(input.next_line().await?.as_deref(), Some("after"));

    // The console stays usable once the operator detaches.
    let node = session.get_mut(index).expect("node exists");
    assert_eq!(node.connection_pubkey().await?, "<<1,2,3>>");

    let sent = repl_log(fixture.epoch_build())?;
    let warmup = sent.iter().position(|l| l == "2+2.").expect("warm-up sent");
    assert_eq!(sent[warmup + 1], "aec_sync:info().");
    assert!(!sent.iter().any(|l| l == DETACH_LINE));

    session.shutdown_all().await;
    Ok(())
}

#[tokio::test]
async fn clean_removes_the_directory_once() -> TestResult<()> {
    let fixture = Fixture::new()?;
    let mut alloc = fixture.allocator()?;
    let mut session = Session::new();
    session
        .create(NodeKind::Elixir, &mut alloc, &fixture.config, fixture.elixir_build())
        .await?;
    session
        .create(NodeKind::Epoch, &mut alloc, &fixture.config, fixture.epoch_build())
        .await?;
    let dirs: Vec<_> = session.working_dirs().map(|d| d.to_path_buf()).collect();

    let report = session.clean_all();
    assert!(report.is_clean());
    assert_eq!(report.removed, dirs);
    assert!(dirs.iter().all(|d| !d.exists()));

    // Already gone: every node reports a failure and the sweep continues.
    let report = session.clean_all();
    assert!(!report.is_clean());
    assert_eq!(report.failed.len(), 2);
    assert!(matches!(report.failed[0].1, HarnessError::Io(_)));

    session.shutdown_all().await;
    assert!(session.is_empty());
    Ok(())
}
