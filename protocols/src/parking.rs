//! Parking-ticket adjudication.
//!
//! Ticketer snapshots the garage and broadcasts it, so every participant
//! knows how many spaces there are to decide on. For each space in order,
//! ParkingAuthority decides whether its paid time has run out and broadcasts
//! the decision; an expired space is sent to Printer, which issues a ticket.

use async_trait::async_trait;
use choreo_epp::{ChoreoOp, Choreography, Coordinator, Located, Location, Result, RunReport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

pub const TICKETER: Location = Location::from_static("ticketer");
pub const PARKING_AUTHORITY: Location = Location::from_static("parking_authority");
pub const PRINTER: Location = Location::from_static("printer");

/// Source of the current time for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock stopped at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub OffsetDateTime);

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupancy {
    pub occupant: String,
    pub start_time: OffsetDateTime,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParkingSpace {
    pub number: u32,
    /// `None` for an empty space.
    pub occupancy: Option<Occupancy>,
}

impl ParkingSpace {
    pub fn empty(number: u32) -> Self {
        Self {
            number,
            occupancy: None,
        }
    }

    pub fn occupied(
        number: u32,
        occupant: impl Into<String>,
        start_time: OffsetDateTime,
        duration: Duration,
    ) -> Self {
        Self {
            number,
            occupancy: Some(Occupancy {
                occupant: occupant.into(),
                start_time,
                duration,
            }),
        }
    }

    /// Occupied and past its paid time at `now`.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.occupancy
            .as_ref()
            .is_some_and(|o| o.start_time + o.duration < now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Garage {
    pub spaces: Vec<ParkingSpace>,
}

impl Garage {
    /// The garage as Ticketer observes it at `now`: space 1 empty, space 2
    /// paid for the next hour, space 3 an hour overdue.
    pub fn snapshot(now: OffsetDateTime) -> Self {
        Self {
            spaces: vec![
                ParkingSpace::empty(1),
                ParkingSpace::occupied(2, "Alice", now, Duration::hours(1)),
                ParkingSpace::occupied(3, "Bob", now - Duration::hours(2), Duration::hours(1)),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub space: u32,
    pub occupant: String,
}

/// Tickets every expired space. Each participant's output is the tickets it
/// printed, so only Printer's is ever non-empty.
#[derive(Clone)]
pub struct TicketingChoreography {
    clock: Arc<dyn Clock>,
    garage: Arc<dyn Fn(OffsetDateTime) -> Garage + Send + Sync>,
}

impl TicketingChoreography {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_garage(clock, Garage::snapshot)
    }

    /// Use `garage` instead of [`Garage::snapshot`] to observe the garage.
    pub fn with_garage(
        clock: Arc<dyn Clock>,
        garage: impl Fn(OffsetDateTime) -> Garage + Send + Sync + 'static,
    ) -> Self {
        Self {
            clock,
            garage: Arc::new(garage),
        }
    }
}

#[async_trait]
impl Choreography for TicketingChoreography {
    type Output = Vec<Ticket>;

    async fn run<Op: ChoreoOp>(&self, op: &Op) -> Result<Vec<Ticket>> {
        let garage_at_ticketer = op.locally(&TICKETER, || Ok((self.garage)(self.clock.now())))?;
        let garage = op.broadcast(&TICKETER, &garage_at_ticketer).await?;

        let mut tickets = Vec::new();
        for space in garage.spaces {
            let expired_at_authority =
                op.locally(&PARKING_AUTHORITY, || Ok(space.is_expired(self.clock.now())))?;
            let expired = op.broadcast(&PARKING_AUTHORITY, &expired_at_authority).await?;
            debug!(space = space.number, expired, "decision");
            if !expired {
                continue;
            }

            let space_at_authority = Located::local(space, PARKING_AUTHORITY);
            let space_at_printer = op.comm(&PARKING_AUTHORITY, &PRINTER, &space_at_authority).await?;
            let ticket = op.locally(&PRINTER, || {
                let space = space_at_printer.get()?;
                let occupant = space
                    .occupancy
                    .as_ref()
                    .map(|o| o.occupant.clone())
                    .unwrap_or_default();
                info!(space = space.number, %occupant, "printing ticket");
                Ok(Ticket {
                    space: space.number,
                    occupant,
                })
            })?;
            tickets.extend(ticket.into_value().ok());
        }
        Ok(tickets)
    }
}

/// Run all three participants with `clock`.
pub async fn run_parking(coordinator: &Coordinator, clock: Arc<dyn Clock>) -> RunReport<Vec<Ticket>> {
    let choreography = TicketingChoreography::new(clock);
    coordinator
        .run([
            (TICKETER, choreography.clone()),
            (PARKING_AUTHORITY, choreography.clone()),
            (PRINTER, choreography),
        ])
        .await
}
