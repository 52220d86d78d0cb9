// Integration tests for group stop / kill / join semantics

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use flock::{Actor, ActorGroup, BoxError, FutureError, FutureState, GroupError, GroupState, Handler};

mod test_helpers;
use test_helpers::{WAIT, new_log, setup_group};

#[test]
fn test_many_actors_drain_before_join_returns() -> anyhow::Result<()> {
    let group = setup_group(2)?;
    let handled = Arc::new(AtomicUsize::new(0));

    let actors: Vec<_> = (0..10)
        .map(|_| {
            let handled = handled.clone();
            let mut count = 0_u32;
            Actor::from_fn(&group, move |_: u32| {
                handled.fetch_add(1, Ordering::SeqCst);
                count += 1;
                Ok(count)
            })
        })
        .collect();

    let mut futures = Vec::new();
    for actor in &actors {
        for n in 0..10 {
            futures.push(actor.send(n));
        }
    }

    group.stop();
    group.join(Some(WAIT))?;

    assert_eq!(handled.load(Ordering::SeqCst), 100);
    assert!(futures.iter().all(|f| f.state() == FutureState::Completed));
    // Each actor saw its own ten messages.
    for last in futures.chunks(10).map(|chunk| &chunk[9]) {
        assert_eq!(last.get(None)?, 10);
    }
    assert!(group.is_done());
    assert_eq!(group.state(), GroupState::Stopped);
    Ok(())
}

#[test]
fn test_join_without_stop_waits_for_queued_work() -> anyhow::Result<()> {
    let group = setup_group(2)?;
    let actor = Actor::from_fn(&group, |ms: u64| {
        thread::sleep(Duration::from_millis(ms));
        Ok(ms)
    });
    let futures: Vec<_> = (0..5).map(|_| actor.send(20)).collect();

    group.join(Some(WAIT))?;
    assert!(futures.iter().all(|f| f.is_done()));
    assert!(!group.is_stopped());

    // The group is still running and accepts more work.
    assert_eq!(actor.send(1).get(Some(WAIT))?, 1);
    Ok(())
}

#[test]
fn test_send_after_stop_is_rejected() -> anyhow::Result<()> {
    let group = setup_group(1)?;
    let actor = Actor::from_fn(&group, |n: u32| Ok(n));
    group.stop();

    let future = actor.send(1);
    assert_eq!(future.state(), FutureState::Failed);
    assert!(matches!(future.get(Some(Duration::ZERO)), Err(FutureError::Stopped)));

    let later = actor.send_later(Duration::from_millis(10), 2);
    assert!(matches!(later.get(Some(Duration::ZERO)), Err(FutureError::Stopped)));

    assert_eq!(actor.queue_len(), 0);
    group.join(Some(WAIT))?;
    Ok(())
}

#[test]
fn test_stop_is_idempotent() -> anyhow::Result<()> {
    let group = setup_group(1)?;
    group.stop();
    group.stop();
    assert!(group.is_stopped());
    assert!(!group.is_killed());
    group.join(Some(WAIT))?;
    Ok(())
}

#[test]
fn test_kill_cancels_queued_entries() -> anyhow::Result<()> {
    let group = setup_group(1)?;
    let (release, gate) = mpsc::channel::<()>();
    let gate = Mutex::new(gate);
    let started = Arc::new(AtomicUsize::new(0));

    let running = started.clone();
    let blocker = Actor::from_fn(&group, move |_: ()| {
        running.fetch_add(1, Ordering::SeqCst);
        let _ = gate.lock().unwrap().recv_timeout(WAIT);
        Ok("finished")
    });
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = ran.clone();
    let queued = Actor::from_fn(&group, move |n: u32| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(n)
    });

    let in_flight = blocker.send(());
    let deadline = Instant::now() + WAIT;
    while started.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    let pending: Vec<_> = (0..5).map(|n| queued.send(n)).collect();

    group.kill();
    assert!(group.is_killed());
    assert_eq!(group.state(), GroupState::Killed);
    release.send(())?;

    // The invocation that was already executing still completes.
    assert_eq!(in_flight.get(Some(WAIT))?, "finished");
    group.join(Some(Duration::from_secs(1)))?;
    assert!(group.join(Some(Duration::ZERO)).is_ok());

    assert_eq!(ran.load(Ordering::SeqCst), 0);
    for future in &pending {
        assert!(future.is_cancelled());
        assert!(matches!(future.get(Some(Duration::ZERO)), Err(FutureError::Cancelled)));
    }

    // Killed groups reject new sends, and stop no longer has any effect.
    assert!(matches!(queued.send(9).get(Some(Duration::ZERO)), Err(FutureError::Stopped)));
    group.stop();
    assert_eq!(group.state(), GroupState::Killed);
    Ok(())
}

#[test]
fn test_kill_cancels_entries_behind_a_running_handler() -> anyhow::Result<()> {
    let group = setup_group(1)?;
    let (release, gate) = mpsc::channel::<()>();
    let gate = Mutex::new(gate);
    let started = Arc::new(AtomicUsize::new(0));

    // The worker holds this actor's turn while its first message blocks.
    let running = started.clone();
    let busy = Actor::from_fn(&group, move |n: u32| {
        running.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            let _ = gate.lock().unwrap().recv_timeout(WAIT);
        }
        Ok(n)
    });
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = ran.clone();
    let idle = Actor::from_fn(&group, move |n: u32| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(n)
    });

    let in_flight = busy.send(0);
    let deadline = Instant::now() + WAIT;
    while started.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    let behind: Vec<_> = (1..=5).map(|n| busy.send(n)).collect();
    let waiting: Vec<_> = (0..5).map(|n| idle.send(n)).collect();

    group.kill();

    // Cancelled by the time kill returns, while the handler is still blocked.
    assert!(behind.iter().chain(&waiting).all(|f| f.is_cancelled()));
    assert_eq!(busy.queue_len(), 0);
    assert_eq!(idle.queue_len(), 0);
    assert!(in_flight.is_pending());

    release.send(())?;
    assert_eq!(in_flight.get(Some(WAIT))?, 0);
    group.join(Some(WAIT))?;
    group.join(Some(Duration::ZERO))?;

    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn test_kill_leaves_only_running_entries_pending() -> anyhow::Result<()> {
    const POOL: usize = 4;
    let group = setup_group(POOL)?;
    let entered = Arc::new(AtomicUsize::new(0));

    let actors: Vec<_> = (0..8)
        .map(|_| {
            let entered = entered.clone();
            Actor::from_fn(&group, move |n: u32| {
                entered.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_micros(50));
                Ok(n)
            })
        })
        .collect();
    let futures: Vec<_> = (0..300)
        .flat_map(|n| actors.iter().map(move |actor| actor.send(n)))
        .collect();

    group.kill();
    let entered_at_kill = entered.load(Ordering::SeqCst);

    // Only entries a worker had already started can still be pending.
    let pending = futures.iter().filter(|f| f.is_pending()).count();
    assert!(pending <= POOL, "{pending} entries left pending after kill");
    assert!(actors.iter().all(|actor| actor.queue_len() == 0));

    group.join(Some(WAIT))?;
    let completed = futures.iter().filter(|f| f.state() == FutureState::Completed).count();
    let cancelled = futures.iter().filter(|f| f.is_cancelled()).count();
    assert_eq!(completed + cancelled, futures.len());
    assert_eq!(entered.load(Ordering::SeqCst), completed);
    assert!(completed <= entered_at_kill + POOL);
    Ok(())
}

#[test]
fn test_kill_cancels_scheduled_sends() -> anyhow::Result<()> {
    let group = setup_group(1)?;
    let actor = Actor::from_fn(&group, |n: u32| Ok(n));
    let later = actor.send_later(Duration::from_secs(60), 1);
    assert_eq!(group.snapshot().scheduled, 1);

    group.kill();
    assert!(later.is_cancelled());
    assert_eq!(group.snapshot().scheduled, 0);
    Ok(())
}

#[test]
fn test_handler_errors_and_panics_fail_only_their_entry() -> anyhow::Result<()> {
    #[derive(Debug, thiserror::Error)]
    #[error("odd input {0}")]
    struct OddInput(u32);

    let group = setup_group(1)?;
    let seen = new_log();
    let log = seen.clone();
    let actor = Actor::from_fn(&group, move |n: u32| {
        if n == 3 {
            panic!("three is not allowed");
        }
        if n % 2 == 1 {
            return Err(OddInput(n).into());
        }
        log.lock().unwrap().push(n);
        Ok(n)
    });

    let futures: Vec<_> = (0..6).map(|n| actor.send(n)).collect();
    group.stop();
    group.join(Some(WAIT))?;

    let err = futures[1].get(None).unwrap_err();
    let failure = err.handler_failure().expect("handler failure");
    assert!(matches!(failure.downcast_ref::<OddInput>(), Some(OddInput(1))));
    assert!(!failure.is_panic());

    let err = futures[3].get(None).unwrap_err();
    let failure = err.handler_failure().expect("handler failure");
    assert!(failure.is_panic());
    assert!(failure.to_string().contains("three is not allowed"));

    assert_eq!(futures[4].get(None)?, 4);
    assert_eq!(*seen.lock().unwrap(), vec![0, 2, 4]);
    Ok(())
}

#[test]
fn test_join_times_out_while_work_is_running() -> anyhow::Result<()> {
    let group = setup_group(1)?;
    let actor = Actor::from_fn(&group, |ms: u64| {
        thread::sleep(Duration::from_millis(ms));
        Ok(())
    });
    actor.send(300);

    let err = group.join(Some(Duration::from_millis(20))).unwrap_err();
    assert!(matches!(err, GroupError::JoinTimeout(d) if d == Duration::from_millis(20)));
    assert!(!group.is_done());

    group.join(Some(WAIT))?;
    assert!(group.is_done());
    Ok(())
}

#[test]
fn test_stopping_state_while_draining() -> anyhow::Result<()> {
    let group = setup_group(1)?;
    let actor = Actor::from_fn(&group, |ms: u64| {
        thread::sleep(Duration::from_millis(ms));
        Ok(())
    });
    actor.send(200);
    group.stop();
    assert_eq!(group.state(), GroupState::Stopping);

    group.join(Some(WAIT))?;
    assert_eq!(group.state(), GroupState::Stopped);
    Ok(())
}

struct Echo;

impl Handler for Echo {
    type Msg = u32;
    type Output = u32;

    fn receive(&mut self, msg: u32) -> Result<u32, BoxError> {
        Ok(msg)
    }
}

#[test]
fn test_dump_reports_pool_and_timer() -> anyhow::Result<()> {
    let group = setup_group(2)?;
    let actor = Actor::named(&group, "dumped", Echo);
    assert_eq!(actor.name(), Some("dumped"));
    actor.send_later(Duration::from_secs(60), 1);

    let snapshot = group.snapshot();
    assert_eq!(snapshot.pool.pool_size, 2);
    assert_eq!(snapshot.pool.workers.len(), 2);
    assert_eq!(snapshot.scheduled, 1);

    let text = group.dump();
    assert!(text.contains("pool size:   2"));
    assert!(text.contains("scheduled:   1"));
    group.kill();
    Ok(())
}

#[tokio::test]
async fn test_join_async() -> anyhow::Result<()> {
    let group = setup_group(2)?;
    let actor = Actor::from_fn(&group, |n: u64| {
        thread::sleep(Duration::from_millis(10));
        Ok(n * n)
    });
    let futures: Vec<_> = (0..8).map(|n| actor.send(n)).collect();

    group.join_async(Some(WAIT)).await?;
    assert!(futures.iter().all(|f| f.is_done()));
    assert_eq!(futures[7].wait(None).await?, 49);

    actor.send(100);
    let err = group.join_async(Some(Duration::ZERO)).await;
    // Either the entry already ran or the zero timeout fired first.
    assert!(err.is_ok() || matches!(err, Err(GroupError::JoinTimeout(_))));
    group.kill();
    Ok(())
}

#[test]
fn test_dropping_last_handle_stops_the_group() -> anyhow::Result<()> {
    let group: ActorGroup = setup_group(1)?;
    let handled = Arc::new(AtomicUsize::new(0));
    let counter = handled.clone();
    let actor = Actor::from_fn(&group, move |_: ()| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let future = actor.send(());
    future.get(Some(WAIT))?;

    drop(actor);
    drop(group);
    assert_eq!(handled.load(Ordering::SeqCst), 1);
    Ok(())
}
