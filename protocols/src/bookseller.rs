//! Buyer/seller negotiation over a single book.
//!
//! 1. Buyer sends the title to Seller.
//! 2. Seller looks up the price (none for an unknown title) and sends it back.
//! 3. Buyer decides whether the price is under budget and broadcasts the decision.
//! 4. On a purchase, Seller sends the delivery date to Buyer.

use async_trait::async_trait;
use choreo_epp::{
    ChoreoOp, Choreography, ChoreographyError, Coordinator, Located, Location, Result, RunReport,
};
use time::macros::date;
use time::Date;
use tracing::{debug, info};

pub const BUYER: Location = Location::from_static("Buyer");
pub const SELLER: Location = Location::from_static("Seller");

/// Buyer's spending limit.
pub const BUDGET: u32 = 100;

/// A catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Book {
    pub price: u32,
    pub delivery_date: Date,
}

/// Seller's catalog.
pub fn lookup(title: &str) -> Option<Book> {
    match title {
        "TAPL" => Some(Book {
            price: 80,
            delivery_date: date!(2023 - 08 - 03),
        }),
        "HoTT" => Some(Book {
            price: 120,
            delivery_date: date!(2023 - 09 - 18),
        }),
        _ => None,
    }
}

/// What one participant learned by the end of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub decision: bool,
    /// Only ever known to Buyer.
    pub delivery_date: Option<Date>,
}

#[derive(Debug, Clone)]
pub struct BooksellerChoreography {
    pub title: Located<String>,
    pub budget: Located<u32>,
}

impl BooksellerChoreography {
    /// Inputs as held by Buyer.
    pub fn for_buyer(title: impl Into<String>, budget: u32) -> Self {
        Self {
            title: Located::local(title.into(), BUYER),
            budget: Located::local(budget, BUYER),
        }
    }

    /// Inputs as seen by Seller: placeholders for Buyer's values.
    pub fn for_seller() -> Self {
        Self {
            title: Located::remote(BUYER),
            budget: Located::remote(BUYER),
        }
    }
}

#[async_trait]
impl Choreography for BooksellerChoreography {
    type Output = Outcome;

    async fn run<Op: ChoreoOp>(&self, op: &Op) -> Result<Outcome> {
        let title_at_seller = op.comm(&BUYER, &SELLER, &self.title).await?;

        let price_at_seller = op.locally(&SELLER, || {
            let price = lookup(title_at_seller.get()?).map(|book| book.price);
            debug!(?price, "seller: price lookup");
            Ok(price)
        })?;
        let price_at_buyer = op.comm(&SELLER, &BUYER, &price_at_seller).await?;

        let decision_at_buyer = op.locally(&BUYER, || {
            let budget = *self.budget.get()?;
            match *price_at_buyer.get()? {
                Some(price) => {
                    let decision = price < budget;
                    info!(price, budget, decision, "buyer: price received");
                    Ok(decision)
                }
                None => {
                    info!("buyer: the book does not exist");
                    Ok(false)
                }
            }
        })?;
        let decision = op.broadcast(&BUYER, &decision_at_buyer).await?;

        if !decision {
            op.locally(&BUYER, || {
                info!("buyer: cannot buy the book");
                Ok(())
            })?;
            return Ok(Outcome {
                decision,
                delivery_date: None,
            });
        }

        let date_at_seller = op.locally(&SELLER, || {
            let title = title_at_seller.get()?;
            lookup(title)
                .map(|book| book.delivery_date)
                .ok_or_else(|| ChoreographyError::local(format!("no delivery date for {title}")))
        })?;
        let date_at_buyer = op.comm(&SELLER, &BUYER, &date_at_seller).await?;
        let observed = op.locally(&BUYER, || {
            let delivery_date = *date_at_buyer.get()?;
            info!(%delivery_date, "buyer: book will be delivered");
            Ok(delivery_date)
        })?;

        Ok(Outcome {
            decision,
            delivery_date: observed.value().copied(),
        })
    }
}

/// Run Buyer (asking for `title` with [`BUDGET`]) and Seller side by side.
pub async fn run_bookseller(coordinator: &Coordinator, title: &str) -> RunReport<Outcome> {
    coordinator
        .run([
            (BUYER, BooksellerChoreography::for_buyer(title, BUDGET)),
            (SELLER, BooksellerChoreography::for_seller()),
        ])
        .await
}
