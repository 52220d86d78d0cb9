use std::time::{Duration, Instant};

use flock::{Actor, ActorGroup, FutureError};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    flock::logging::init_default();

    let group = ActorGroup::new()?;
    let started = Instant::now();
    let ticker = Actor::from_fn(&group, move |tick: u32| {
        Ok(format!("tick {tick} at {:?}", started.elapsed()))
    });

    let ticks: Vec<_> = (1..=5)
        .map(|n| ticker.send_later(Duration::from_millis(100 * u64::from(n)), n))
        .collect();
    for tick in &ticks {
        println!("{}", tick.get(Some(Duration::from_secs(5)))?);
    }

    // Pending ticks are cancelled when the group stops.
    let late = ticker.send_later(Duration::from_secs(60), 60);
    group.stop();
    match late.get(Some(Duration::ZERO)) {
        Err(FutureError::Cancelled) => println!("late tick cancelled"),
        other => println!("late tick: {other:?}"),
    }

    group.join(Some(Duration::from_secs(5)))?;
    Ok(())
}
