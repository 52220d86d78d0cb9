use std::time::Duration;

use flock::{Actor, ActorGroup, BoxError, GroupConfig, Handler};

// Define messages
#[derive(Debug, Clone)]
enum Ball {
    Ping(u32),
    Pong(u32),
}

// Define actors
struct Player {
    name: &'static str,
    hits: u32,
}

impl Handler for Player {
    type Msg = Ball;
    type Output = String;

    fn receive(&mut self, msg: Ball) -> Result<String, BoxError> {
        self.hits += 1;
        let reply = match msg {
            Ball::Ping(n) => format!("{} returned Ping({n}) as Pong({})", self.name, n + 1),
            Ball::Pong(n) => format!("{} returned Pong({n}) as Ping({})", self.name, n + 1),
        };
        tracing::info!(player = self.name, hits = self.hits, "{reply}");
        Ok(reply)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    flock::logging::init_development();

    let group = ActorGroup::with_config(GroupConfig::with_pool_size(2))?;
    let ping = Actor::named(&group, "ping", Player { name: "ping", hits: 0 });
    let pong = Actor::named(&group, "pong", Player { name: "pong", hits: 0 });

    // Each volley is sent once the previous one has landed.
    let mut last = ping.send(Ball::Ping(0));
    for n in 1..6 {
        last = if n % 2 == 1 {
            pong.send_when_complete(&last, Ball::Pong(n))
        } else {
            ping.send_when_complete(&last, Ball::Ping(n))
        };
    }
    println!("final volley: {}", last.wait(Some(Duration::from_secs(5))).await?);

    // A serve that is called off before it happens.
    let serve = ping.send_later(Duration::from_millis(200), Ball::Ping(99));
    serve.cancel();

    println!("{}", group.dump());
    group.stop();
    group.join_async(Some(Duration::from_secs(5))).await?;
    Ok(())
}
