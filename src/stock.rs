//! FIFO recommendation over consumable stock batches.

use chrono::NaiveDate;
use std::cmp::Ordering;

/// One delivery of a consumable item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
  pub id: String,
  pub item_id: String,
  pub quantity: u64,
  pub expires_on: Option<NaiveDate>,
}

impl Batch {
  pub fn is_expired(&self, today: NaiveDate) -> bool {
    self.expires_on.is_some_and(|d| d < today)
  }

  fn is_usable(&self, today: NaiveDate) -> bool {
    self.quantity > 0 && !self.is_expired(today)
  }
}

/// Nearest expiry first; batches that never expire last; ties by id.
fn fifo_order(a: &Batch, b: &Batch) -> Ordering {
  match (a.expires_on, b.expires_on) {
    (Some(x), Some(y)) => x.cmp(&y),
    (Some(_), None) => Ordering::Less,
    (None, Some(_)) => Ordering::Greater,
    (None, None) => Ordering::Equal,
  }
  .then_with(|| a.id.cmp(&b.id))
}

/// Usable batches in the order they should be consumed.
pub fn fifo(batches: &[Batch], today: NaiveDate) -> Vec<&Batch> {
  let mut usable: Vec<&Batch> = batches.iter().filter(|b| b.is_usable(today)).collect();
  usable.sort_by(|a, b| fifo_order(a, b));
  usable
}

/// The batch to take from next.
pub fn recommend(batches: &[Batch], today: NaiveDate) -> Option<&Batch> {
  fifo(batches, today).into_iter().next()
}

/// Expired batches still holding stock.
pub fn expired(batches: &[Batch], today: NaiveDate) -> Vec<&Batch> {
  let mut expired: Vec<&Batch> = batches
    .iter()
    .filter(|b| b.quantity > 0 && b.is_expired(today))
    .collect();
  expired.sort_by(|a, b| fifo_order(a, b));
  expired
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Withdrawal<'a> {
  pub batch: &'a Batch,
  pub quantity: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalPlan<'a> {
  pub withdrawals: Vec<Withdrawal<'a>>,
  /// Quantity that could not be covered by usable stock
  pub shortfall: u64,
}

/// Split `quantity` across batches in FIFO order.
pub fn plan_withdrawal(batches: &[Batch], quantity: u64, today: NaiveDate) -> WithdrawalPlan<'_> {
  let mut remaining = quantity;
  let mut withdrawals = Vec::new();

  for batch in fifo(batches, today) {
    if remaining == 0 {
      break;
    }
    let take = remaining.min(batch.quantity);
    withdrawals.push(Withdrawal {
      batch,
      quantity: take,
    });
    remaining -= take;
  }

  WithdrawalPlan {
    withdrawals,
    shortfall: remaining,
  }
}
