//! Bookseller and parking runs over every transport backend.

use choreo_epp::{
    Coordinator, HttpTransport, HttpTransportConfig, Location, MemoryBroker, MemoryTransport,
    PubSubTransport, Transport,
};
use choreo_epp_protocols::{
    run_bookseller, run_parking, FixedClock, Garage, Outcome, ParkingSpace, TicketingChoreography,
    BUYER, PARKING_AUTHORITY, PRINTER, SELLER, TICKETER,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use time::macros::{date, datetime};
use time::Duration as Span;

#[derive(Debug, Clone, Copy)]
enum Backend {
    Memory,
    Http,
    PubSub,
}

const BACKENDS: [Backend; 3] = [Backend::Memory, Backend::Http, Backend::PubSub];

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn transport(backend: Backend, locations: &[Location]) -> Arc<dyn Transport> {
    let locations = locations.to_vec();
    match backend {
        Backend::Memory => Arc::new(MemoryTransport::new(locations)),
        Backend::Http => {
            let config = HttpTransportConfig::new(SocketAddr::from(([127, 0, 0, 1], 0)));
            Arc::new(HttpTransport::bind(&config, locations).await.unwrap())
        }
        Backend::PubSub => Arc::new(
            PubSubTransport::connect(Arc::new(MemoryBroker::new()), locations)
                .await
                .unwrap(),
        ),
    }
}

fn coordinator(transport: Arc<dyn Transport>) -> Coordinator {
    Coordinator::new(transport)
        .with_receive_timeout(Duration::from_secs(5))
        .with_run_timeout(Duration::from_secs(10))
}

#[tokio::test]
async fn affordable_book_is_bought_and_delivery_date_reaches_buyer() {
    init_tracing();
    for backend in BACKENDS {
        let transport = transport(backend, &[BUYER, SELLER]).await;
        let report = run_bookseller(&coordinator(Arc::clone(&transport)), "TAPL").await;

        let buyer = report.outcome(&BUYER).unwrap().as_ref().unwrap();
        let seller = report.outcome(&SELLER).unwrap().as_ref().unwrap();
        assert_eq!(
            *buyer,
            Outcome {
                decision: true,
                delivery_date: Some(date!(2023 - 08 - 03)),
            },
            "{backend:?}"
        );
        assert!(seller.decision, "{backend:?}");
        assert_eq!(seller.delivery_date, None, "{backend:?}");
        assert_eq!(report.failed_sends(), 0, "{backend:?}");
        transport.close().await.unwrap();
    }
}

#[tokio::test]
async fn over_budget_book_is_declined() {
    init_tracing();
    for backend in BACKENDS {
        let transport = transport(backend, &[BUYER, SELLER]).await;
        let report = run_bookseller(&coordinator(Arc::clone(&transport)), "HoTT").await;

        for location in [BUYER, SELLER] {
            let outcome = report.outcome(&location).unwrap().as_ref().unwrap();
            assert!(!outcome.decision, "{backend:?} at {location}");
            assert_eq!(outcome.delivery_date, None);
        }
        transport.close().await.unwrap();
    }
}

#[tokio::test]
async fn unknown_book_is_declined_without_delivery_date() {
    init_tracing();
    for backend in BACKENDS {
        let transport = transport(backend, &[BUYER, SELLER]).await;
        let report = run_bookseller(&coordinator(Arc::clone(&transport)), "unknown-book").await;

        assert!(report.is_success(), "{backend:?}");
        let buyer = report.outcome(&BUYER).unwrap().as_ref().unwrap();
        assert_eq!(
            *buyer,
            Outcome {
                decision: false,
                delivery_date: None,
            }
        );
        transport.close().await.unwrap();
    }
}

#[tokio::test]
async fn only_expired_space_is_ticketed() {
    init_tracing();
    let clock = Arc::new(FixedClock(datetime!(2024-03-01 12:00 UTC)));
    for backend in BACKENDS {
        let transport = transport(backend, &[TICKETER, PARKING_AUTHORITY, PRINTER]).await;
        let report = run_parking(&coordinator(Arc::clone(&transport)), clock.clone()).await;

        assert!(report.is_success(), "{backend:?}");
        let printed = report.outcome(&PRINTER).unwrap().as_ref().unwrap();
        assert_eq!(printed.len(), 1, "{backend:?}");
        assert_eq!(printed[0].space, 3);
        assert_eq!(printed[0].occupant, "Bob");
        for location in [TICKETER, PARKING_AUTHORITY] {
            assert!(report.outcome(&location).unwrap().as_ref().unwrap().is_empty());
        }
        transport.close().await.unwrap();
    }
}

#[tokio::test]
async fn every_expired_space_is_ticketed_in_order() {
    init_tracing();
    let clock = Arc::new(FixedClock(datetime!(2024-03-01 12:00 UTC)));
    let choreography = TicketingChoreography::with_garage(clock, |now| Garage {
        spaces: vec![
            ParkingSpace::occupied(4, "Dana", now - Span::hours(3), Span::hours(1)),
            ParkingSpace::empty(5),
            ParkingSpace::occupied(6, "Eve", now - Span::minutes(90), Span::hours(1)),
            ParkingSpace::occupied(7, "Finn", now, Span::hours(2)),
        ],
    });

    let transport = transport(Backend::Memory, &[TICKETER, PARKING_AUTHORITY, PRINTER]).await;
    let report = coordinator(transport).run_everywhere(choreography).await;

    let printed = report.outcome(&PRINTER).unwrap().as_ref().unwrap();
    let spaces: Vec<u32> = printed.iter().map(|ticket| ticket.space).collect();
    assert_eq!(spaces, vec![4, 6]);
}
