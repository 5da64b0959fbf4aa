use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use lanlink::{Address, ClientConfig, ClientSession, PlayerId, SessionListener};

use crate::chat;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const CHAT_INTERVAL: Duration = Duration::from_secs(2);

/// Logs connection notifications.
struct LogListener {
    last_progress_log: Duration,
}

impl SessionListener for LogListener {
    fn on_progress(&mut self, since_last_datagram: Duration) {
        // only worth mentioning once the server has been quiet for a while
        if since_last_datagram >= Duration::from_secs(1)
            && since_last_datagram.saturating_sub(self.last_progress_log) >= Duration::from_secs(1)
        {
            log::info!("Waiting for server ({:.1}s)", since_last_datagram.as_secs_f32());
            self.last_progress_log = since_last_datagram;
        } else if since_last_datagram < self.last_progress_log {
            self.last_progress_log = Duration::ZERO;
        }
    }

    fn on_connected(&mut self, player_id: PlayerId) {
        log::info!("Joined as player {}", player_id);
    }

    fn on_time_out(&mut self) {
        log::warn!("Connection timed out, retrying");
    }

    fn on_disconnected(&mut self) {
        log::info!("Disconnected");
    }

    fn on_joined(&mut self, player_id: PlayerId, name: &str) {
        log::info!("Player {} '{}' is here", player_id, name);
    }

    fn on_left(&mut self, player_id: PlayerId) {
        log::info!("Player {} left", player_id);
    }
}

pub fn scan(game: &str, port: u16, run_for: Duration) -> Result<()> {
    let mut client = ClientSession::new(game, ClientConfig::default())?;
    client.start_scanning(port)?;

    let started = Instant::now();
    let mut last_tick = started;
    while started.elapsed() < run_for {
        let now = Instant::now();
        client.tick(now - last_tick)?;
        last_tick = now;
        std::thread::sleep(POLL_INTERVAL);
    }

    if client.num_possible_games() == 0 {
        println!("No '{}' games found on port {}", game, port);
    }
    for game in client.possible_games().iter() {
        println!(
            "{:<24} {:<21} players {}/{}",
            game.session_name, game.address, game.params.num_players, game.params.max_players
        );
    }
    Ok(())
}

pub fn join(game: &str, address: Address, name: &str, password: &str, run_for: Option<Duration>) -> Result<()> {
    let mut client = ClientSession::new(game, ClientConfig::default())?;
    client.connect_to_game(
        address,
        Box::new(LogListener {
            last_progress_log: Duration::ZERO,
        }),
        name,
        password,
    )?;

    let started = Instant::now();
    let mut last_tick = started;
    let mut next_chat = CHAT_INTERVAL;
    let mut counter = 0u32;
    while !run_for.is_some_and(|limit| started.elapsed() >= limit) {
        let now = Instant::now();
        client.tick(now - last_tick)?;
        last_tick = now;

        if !client.is_connecting() {
            bail!("connection to {} closed", address);
        }

        let Some(channel) = client.channel_mut() else {
            break;
        };
        while let Some(message) = channel.consume_front() {
            match chat::decode(&message) {
                Some(text) => log::info!("Received: {}", text),
                None => log::debug!("Ignoring {} byte non-chat message", message.len()),
            }
        }

        if client.player_id().is_some() && started.elapsed() >= next_chat {
            next_chat += CHAT_INTERVAL;
            counter += 1;
            let text = format!("{} says hello #{}", name, counter);
            if let Some(channel) = client.channel_mut() {
                channel.enqueue(&chat::encode(&text))?;
                let stats = channel.stats_snapshot();
                log::debug!(
                    "rtt {:.0}ms, sent {} msgs, lost {:.1}%",
                    stats.rtt.as_secs_f64() * 1000.0,
                    stats.messages_sent,
                    stats.sent_loss_percent()
                );
            }
        }

        std::thread::sleep(POLL_INTERVAL);
    }

    client.disconnect_from_game();
    Ok(())
}
