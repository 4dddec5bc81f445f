//! Periodic flush of moves, timers and pending acks
//!
//! Two independent intervals drive the scheduler: the move tick
//! (`MOVES_UPDATE_FREQUENCY_MS`) and the resend sweep (`RESEND_INTERVAL_MS`).
//! A panic inside one room is caught and logged so the sweep carries on with
//! the rest.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::ServerConfig;
use crate::game::constants::net::MAINTENANCE_EVERY_TICKS;
use crate::lobby::manager::RoomRegistry;
use crate::lobby::room::GameRoom;
use crate::metrics::Metrics;

/// Counts from one tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub move_datagrams: usize,
    pub disconnects: usize,
    pub power_ups_spawned: usize,
    pub idle_kicked: usize,
    pub failed_rooms: usize,
}

pub struct TickScheduler {
    rooms: Arc<RoomRegistry>,
    metrics: Arc<Metrics>,
    tick_interval: Duration,
    resend_interval: Duration,
    ticks: AtomicU64,
}

/// Run `task` for one room, turning a panic into `None`
fn guarded<T>(room: &GameRoom, task: &str, f: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Room {} {} failed, continuing sweep", room.id, task);
            None
        }
    }
}

impl TickScheduler {
    pub fn new(rooms: Arc<RoomRegistry>, metrics: Arc<Metrics>, config: &ServerConfig) -> Self {
        Self {
            rooms,
            metrics,
            tick_interval: config.tick_interval(),
            resend_interval: config.resend_interval(),
            ticks: AtomicU64::new(0),
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// One move tick: room inboxes, power-up timers, visibility-culled move
    /// flush, and every few ticks the idle and retention sweeps.
    pub fn tick(&self, now: Instant) -> TickReport {
        let started = Instant::now();
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let maintenance = tick % MAINTENANCE_EVERY_TICKS == 0;

        let rooms: Vec<&Arc<GameRoom>> = self.rooms.iter().collect();
        let report = rooms
            .par_iter()
            .map(|room| {
                guarded(room, "tick", || {
                    let mut report = TickReport {
                        disconnects: room.drain_notifications(now),
                        ..Default::default()
                    };
                    if room.is_closed() {
                        return report;
                    }
                    report.power_ups_spawned = room.run_timers(now);
                    if room.player_count() > 0 {
                        report.move_datagrams = room.flush_moves();
                    }
                    if maintenance {
                        report.idle_kicked = room.sweep_idle(now);
                        let (expired_events, expired_snapshots) = room.sweep_stores(now);
                        if expired_events + expired_snapshots > 0 {
                            tracing::trace!(
                                "Room {} expired {} dedup records, {} recovery snapshots",
                                room.id,
                                expired_events,
                                expired_snapshots
                            );
                        }
                    }
                    report
                })
                .unwrap_or(TickReport {
                    failed_rooms: 1,
                    ..Default::default()
                })
            })
            .reduce(TickReport::default, |a, b| TickReport {
                move_datagrams: a.move_datagrams + b.move_datagrams,
                disconnects: a.disconnects + b.disconnects,
                power_ups_spawned: a.power_ups_spawned + b.power_ups_spawned,
                idle_kicked: a.idle_kicked + b.idle_kicked,
                failed_rooms: a.failed_rooms + b.failed_rooms,
            });

        Metrics::incr(&self.metrics.datagrams_sent, report.move_datagrams as u64);
        self.metrics.record_tick_time(started.elapsed());
        report
    }

    /// Resend pending acks for every room, closed ones included
    pub fn resend_pending(&self) -> usize {
        let mut resent = 0;
        let mut pending = 0;
        for room in self.rooms.iter() {
            if let Some((sent, waiting)) = guarded(room, "resend", || (room.resend_pending(), room.pending_acks())) {
                resent += sent;
                pending += waiting;
            }
        }
        Metrics::incr(&self.metrics.resends, resent as u64);
        Metrics::incr(&self.metrics.datagrams_sent, resent as u64);
        self.metrics.pending_acks.store(pending as u64, Ordering::Relaxed);
        resent
    }

    /// Drive both intervals until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = interval(self.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut resend = interval(self.resend_interval);
        resend.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            "Scheduler started: moves every {:?}, resend every {:?}",
            self.tick_interval,
            self.resend_interval
        );

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let report = self.tick(Instant::now());
                    if report.failed_rooms > 0 {
                        tracing::warn!("{} rooms failed this tick", report.failed_rooms);
                    }
                }
                _ = resend.tick() => {
                    self.resend_pending();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Scheduler stopped after {} ticks", self.ticks());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::room::tests::{join, movement};
    use crate::net::protocol::ServerEvent;
    use crate::net::session::tests::{decode_event, RecordingSender};
    use crate::net::session::DatagramSender;
    use std::net::SocketAddr;

    fn scheduler(rooms: usize) -> (TickScheduler, Arc<RecordingSender>) {
        let config = ServerConfig {
            game_rooms: rooms,
            ..Default::default()
        };
        let sender = Arc::new(RecordingSender::default());
        let metrics = Arc::new(Metrics::new());
        let registry = Arc::new(RoomRegistry::new(&config, sender.clone(), metrics.clone()));
        (TickScheduler::new(registry, metrics, &config), sender)
    }

    #[test]
    fn test_tick_flushes_moves_in_every_open_room() {
        let (scheduler, sender) = scheduler(2);
        let mut receivers = Vec::new();
        for room in scheduler.rooms.iter() {
            let (a, a_rx) = join(room, "alice");
            let (b, b_rx) = join(room, "bob");
            a.bind_unreliable_address("10.0.0.1:7000".parse().unwrap());
            b.bind_unreliable_address("10.0.0.2:7000".parse().unwrap());
            room.handle_move(&movement(1, 0.0, 1), Instant::now()).unwrap();
            room.handle_move(&movement(2, 1.0, 1), Instant::now()).unwrap();
            receivers.push((a_rx, b_rx));
        }
        sender.take();

        let report = scheduler.tick(Instant::now());
        assert_eq!(report.move_datagrams, 4);
        assert_eq!(report.failed_rooms, 0);
        assert_eq!(scheduler.tick(Instant::now()).move_datagrams, 0);
        assert_eq!(scheduler.metrics.tick_count.load(Ordering::Relaxed), 2);
    }

    /// Panics on one address block, records everything else
    #[derive(Default)]
    struct FaultySender {
        inner: RecordingSender,
    }

    impl DatagramSender for FaultySender {
        fn send_datagram(&self, addr: SocketAddr, bytes: &[u8]) -> bool {
            if addr.ip().to_string().starts_with("10.0.66.") {
                panic!("socket failure for {}", addr);
            }
            self.inner.send_datagram(addr, bytes)
        }
    }

    #[test]
    fn test_panicking_room_does_not_stop_others() {
        let config = ServerConfig {
            game_rooms: 2,
            ..Default::default()
        };
        let sender = Arc::new(FaultySender::default());
        let metrics = Arc::new(Metrics::new());
        let registry = Arc::new(RoomRegistry::new(&config, sender.clone(), metrics.clone()));
        let scheduler = TickScheduler::new(registry, metrics, &config);

        let mut receivers = Vec::new();
        for (room, subnet) in scheduler.rooms.iter().zip(["10.0.66", "10.0.0"]) {
            let (a, a_rx) = join(room, "alice");
            let (b, b_rx) = join(room, "bob");
            a.bind_unreliable_address(format!("{}.1:7000", subnet).parse().unwrap());
            b.bind_unreliable_address(format!("{}.2:7000", subnet).parse().unwrap());
            room.handle_move(&movement(1, 0.0, 1), Instant::now()).unwrap();
            room.handle_move(&movement(2, 1.0, 1), Instant::now()).unwrap();
            receivers.push((a_rx, b_rx));
        }
        sender.inner.take();

        let report = scheduler.tick(Instant::now());
        assert_eq!(report.failed_rooms, 1);
        assert_eq!(report.move_datagrams, 2);
        let sent = sender.inner.take();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(addr, _)| addr.ip().to_string().starts_with("10.0.0.")));

        // The failed room is still swept on the next tick
        assert_eq!(scheduler.tick(Instant::now()).failed_rooms, 0);
        assert_eq!(scheduler.rooms.get(0).unwrap().player_count(), 2);
    }

    #[test]
    fn test_closed_room_skips_moves_but_resends() {
        let (scheduler, sender) = scheduler(1);
        let room = scheduler.rooms.get(0).unwrap().clone();
        let (a, _a_rx) = join(&room, "alice");
        let (_b, _b_rx) = join(&room, "bob");
        a.bind_unreliable_address("10.0.0.1:7000".parse().unwrap());
        a.write_unreliable(ServerEvent::Exit { player_id: 7 });
        room.close();
        sender.take();

        assert_eq!(scheduler.tick(Instant::now()).move_datagrams, 0);
        assert_eq!(scheduler.resend_pending(), 1);
        assert_eq!(scheduler.resend_pending(), 1);
        let resent = sender.take();
        assert_eq!(resent.len(), 2);

        let sequence = decode_event(&resent[0].1).sequence;
        assert!(a.ack_received(sequence));
        assert_eq!(scheduler.resend_pending(), 0);
        assert_eq!(scheduler.metrics.resends.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_tick_drains_disconnects() {
        let (scheduler, _) = scheduler(1);
        let room = scheduler.rooms.get(0).unwrap().clone();
        let (a, _rx) = join(&room, "alice");
        a.close(crate::net::session::DisconnectReason::ChannelClosed);
        assert_eq!(scheduler.tick(Instant::now()).disconnects, 1);
        assert_eq!(room.player_count(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (scheduler, _) = scheduler(1);
        let scheduler = Arc::new(scheduler);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.clone().run(rx));
        tokio::time::sleep(Duration::from_millis(120)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(scheduler.ticks() >= 1);
    }
}
