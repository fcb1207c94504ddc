mod common;

use common::{TestGame, GAME_ID, PRISTINE};
use layerkeep::{
    lock::DirectoryLocker, DeployReport, DeploymentCoordinator, ManagerContext, ManagerError,
    ManagerSettings,
};
use std::{fs, sync::Barrier, thread, time::Duration};

const RACE_FILES: usize = 150;

/// Compiles `id` with enough files that its deploy outlasts a competing start.
fn compile_bulky(game: &TestGame, id: &str) {
    let files: Vec<(String, String)> = (0..RACE_FILES)
        .map(|index| (format!("Data/{id}/{index}.txt"), format!("{id} payload {index}")))
        .collect();
    let refs: Vec<(&str, &str)> = files
        .iter()
        .map(|(path, contents)| (path.as_str(), contents.as_str()))
        .collect();
    game.compile(id, 1, &refs);
}

fn race_deploys(
    first: &DeploymentCoordinator,
    second: &DeploymentCoordinator,
) -> [Result<DeployReport, ManagerError>; 2] {
    let barrier = Barrier::new(2);
    thread::scope(|scope| {
        let a = scope.spawn(|| {
            barrier.wait();
            first.deploy("mod-a")
        });
        let b = scope.spawn(|| {
            barrier.wait();
            second.deploy("mod-b")
        });
        [a.join().unwrap(), b.join().unwrap()]
    })
}

fn assert_single_winner(game: &TestGame, results: [Result<DeployReport, ManagerError>; 2]) {
    let [a, b] = results;
    let (winner, loser, err) = match (a, b) {
        (Ok(_), Err(err)) => ("mod-a", "mod-b", err),
        (Err(err), Ok(_)) => ("mod-b", "mod-a", err),
        (a, b) => panic!("expected exactly one deploy to win: {a:?} / {b:?}"),
    };
    assert!(matches!(err, ManagerError::GameLocked { ref game_id } if game_id == GAME_ID));

    let deployed: Vec<String> = game
        .coordinator
        .deployed_mods()
        .unwrap()
        .into_iter()
        .map(|entry| entry.id)
        .collect();
    assert_eq!(deployed, [winner]);
    for index in [0, RACE_FILES / 2, RACE_FILES - 1] {
        let won = format!("Data/{winner}/{index}.txt");
        let lost = format!("Data/{loser}/{index}.txt");
        assert_eq!(game.owners(&won), [winner]);
        assert!(game.owners(&lost).is_empty());
        assert!(!game.has_lineage_doc(&lost));
        assert!(game.live(&lost).is_none());
    }
    assert!(!game.coordinator.layout().lock_marker().exists());
}

#[test]
fn racing_deploys_from_separate_processes_have_one_winner() {
    let game = TestGame::new();
    compile_bulky(&game, "mod-a");
    compile_bulky(&game, "mod-b");
    let first = game.second_coordinator(ManagerContext::default());
    let second = game.second_coordinator(ManagerContext::default());

    let results = race_deploys(&first, &second);
    assert_single_winner(&game, results);
}

#[test]
fn racing_deploys_through_shared_context_have_one_winner() {
    let context = ManagerContext::default();
    let game = TestGame::with_context(context.clone());
    compile_bulky(&game, "mod-a");
    compile_bulky(&game, "mod-b");
    let second = game.second_coordinator(context.clone());

    let results = race_deploys(&game.coordinator, &second);
    assert_single_winner(&game, results);
    assert!(!context.locks().is_locked("game:demo"));
}

#[test]
fn busy_game_rejects_deploy_from_another_process() {
    let game = TestGame::new();
    game.compile("mod-a", 1, &[("Data/rock.dds", "rock from a")]);

    // A second context stands in for another process: only the marker file is shared.
    let other = ManagerContext::default();
    let held = other.lock_game(GAME_ID, game.root.path()).unwrap();

    let err = game.coordinator.deploy("mod-a").unwrap_err();
    assert!(matches!(err, ManagerError::GameLocked { ref game_id } if game_id == GAME_ID));
    assert_eq!(game.live("Data/rock.dds").unwrap(), PRISTINE);
    assert!(game.owners("Data/rock.dds").is_empty());
    assert!(!game.has_backup("Data/rock.dds"));

    drop(held);
    game.coordinator.deploy("mod-a").unwrap();
    assert_eq!(game.live("Data/rock.dds").unwrap(), b"rock from a");
}

#[test]
fn shared_context_rejects_concurrent_operation() {
    let context = ManagerContext::default();
    let game = TestGame::with_context(context.clone());
    game.compile("mod-a", 1, &[("Data/rock.dds", "rock from a")]);
    let sibling = game.second_coordinator(context.clone());

    let held = context.lock_game(GAME_ID, game.root.path()).unwrap();
    assert!(context.locks().is_locked("game:demo"));
    assert!(matches!(
        sibling.deploy("mod-a"),
        Err(ManagerError::GameLocked { .. })
    ));
    assert!(matches!(
        sibling.compile(game.sources.path(), layerkeep::CompileMetadata::new("other")),
        Err(ManagerError::GameLocked { .. })
    ));
    drop(held);

    sibling.deploy("mod-a").unwrap();
    assert!(matches!(
        game.coordinator.remove("mod-a").map(|report| report.is_partial()),
        Ok(false)
    ));
}

#[test]
fn lock_is_released_after_success_and_failure() {
    let context = ManagerContext::default();
    let game = TestGame::with_context(context.clone());
    let marker = game.coordinator.layout().lock_marker();
    game.compile("mod-a", 1, &[("Data/rock.dds", "rock from a")]);

    game.coordinator.deploy("mod-a").unwrap();
    assert!(!marker.exists());
    assert!(!context.locks().is_locked("game:demo"));

    assert!(game.coordinator.deploy("missing").is_err());
    assert!(!marker.exists());
    assert!(!context.locks().is_locked("game:demo"));

    game.coordinator.remove("mod-a").unwrap();
    assert!(!marker.exists());
}

#[test]
fn abandoned_marker_blocks_until_swept() {
    let game = TestGame::new();
    game.compile("mod-a", 1, &[("Data/rock.dds", "rock from a")]);
    assert!(DirectoryLocker::lock_directory(game.root.path()));

    assert!(matches!(
        game.coordinator.deploy("mod-a"),
        Err(ManagerError::GameLocked { .. })
    ));

    let marker = game.coordinator.layout().lock_marker();
    fs::write(&marker, r#"{"pid":1,"acquired_at":1000}"#).unwrap();
    let sweeping = game.second_coordinator(ManagerContext::new(ManagerSettings {
        stale_lock_after: Some(Duration::from_secs(60)),
    }));
    sweeping.deploy("mod-a").unwrap();
    assert!(!marker.exists());
    assert_eq!(game.live("Data/rock.dds").unwrap(), b"rock from a");
}
