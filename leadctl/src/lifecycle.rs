//! Lead state machine.
//!
//! A lead starts `PENDING` and moves to `REACHED_OUT` once an attorney has contacted the
//! prospect. `REACHED_OUT` is terminal. Moving into it stamps attribution (who and when) exactly
//! once. Notes may be edited in either state.
//!
//! ```text
//! PENDING ──(attorney reaches out)──> REACHED_OUT
//! ```

use crate::api::models::leads::{LeadState, LeadUpdate};
use crate::db::models::leads::LeadUpdateDBRequest;
use crate::types::UserId;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Lead cannot move from {from:?} back to {to:?}")]
    Backward { from: LeadState, to: LeadState },
}

impl From<TransitionError> for crate::errors::Error {
    fn from(err: TransitionError) -> Self {
        crate::errors::Error::BadRequest { message: err.to_string() }
    }
}

/// Decide which columns a PATCH writes, given the lead's current state.
///
/// Re-applying the state a lead is already in is accepted and changes nothing; in particular a
/// second `REACHED_OUT` never re-stamps attribution. The repository only writes attribution while
/// it is unset, so concurrent first transitions still produce a single stamp.
pub fn plan_update(current: LeadState, patch: &LeadUpdate, actor: UserId) -> Result<LeadUpdateDBRequest, TransitionError> {
    let mut request = LeadUpdateDBRequest {
        notes: patch.notes.clone(),
        ..Default::default()
    };

    match (current, patch.state) {
        (_, None) | (LeadState::Pending, Some(LeadState::Pending)) | (LeadState::ReachedOut, Some(LeadState::ReachedOut)) => {}
        (LeadState::Pending, Some(LeadState::ReachedOut)) => {
            request.state = Some(LeadState::ReachedOut);
            request.stamp_attribution_for = Some(actor);
        }
        (from @ LeadState::ReachedOut, Some(to @ LeadState::Pending)) => {
            return Err(TransitionError::Backward { from, to });
        }
    }

    Ok(request)
}
