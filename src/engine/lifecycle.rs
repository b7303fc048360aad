use ulid::Ulid;

use crate::model::ReservationStatus;

use super::EngineError;

/// Reservation state machine.
///
/// ```text
/// WAITING ──approve──▶ APPROVED
///    └─────reject────▶ REJECTED
/// ```
///
/// Decisions are final: APPROVED, REJECTED and CANCELED accept no further
/// transition.
pub fn next_status(
    id: Ulid,
    current: ReservationStatus,
    approve: bool,
) -> Result<ReservationStatus, EngineError> {
    match current {
        ReservationStatus::Waiting if approve => Ok(ReservationStatus::Approved),
        ReservationStatus::Waiting => Ok(ReservationStatus::Rejected),
        ReservationStatus::Approved | ReservationStatus::Rejected | ReservationStatus::Canceled => {
            Err(EngineError::InvalidTransition { id, status: current })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waiting_can_be_approved_or_rejected() {
        let id = Ulid::new();
        assert_eq!(
            next_status(id, ReservationStatus::Waiting, true).unwrap(),
            ReservationStatus::Approved
        );
        assert_eq!(
            next_status(id, ReservationStatus::Waiting, false).unwrap(),
            ReservationStatus::Rejected
        );
    }

    #[test]
    fn repeating_a_decision_fails() {
        let id = Ulid::new();
        let err = next_status(id, ReservationStatus::Approved, true).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition { status: ReservationStatus::Approved, .. }
        ));
        let err = next_status(id, ReservationStatus::Rejected, false).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition { status: ReservationStatus::Rejected, .. }
        ));
    }

    #[test]
    fn decisions_are_final() {
        let id = Ulid::new();
        assert!(next_status(id, ReservationStatus::Approved, false).is_err());
        assert!(next_status(id, ReservationStatus::Rejected, true).is_err());
        assert!(next_status(id, ReservationStatus::Canceled, true).is_err());
        assert!(next_status(id, ReservationStatus::Canceled, false).is_err());
    }
}
