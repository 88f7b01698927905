//! Capability algebra via prime factorization.
//!
//! `capabilities` is the product of a subset of four primes. "Has X" is a
//! single modulo; "take away X" is an integer divide guarded by the same
//! modulo. This makes composition commutative.

pub const CAN_EDIT_CONTENT: u16 = 2;
pub const CAN_SEE_OTHER_CLIENTS: u16 = 3;
pub const CAN_SEE_NON_RESTRICTED_EVENTS: u16 = 5;
pub const CAN_SEE_ALL_EDITOR_EVENTS: u16 = 7;

/// Product of zero or more of the four capability primes. `1` means "no
/// capabilities". Values are set once at bootstrap and only ever shrink via
/// [`Capability::take_away`] afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Capability(u16);

impl Capability {
    pub const NONE: Capability = Capability(1);

    /// Build from a set of primes, e.g.
    /// `Capability::from_primes(&[CAN_EDIT_CONTENT, CAN_SEE_OTHER_CLIENTS])`.
    pub fn from_primes(primes: &[u16]) -> Self {
        let mut value: u16 = 1;
        for &p in primes {
            if value % p != 0 {
                value *= p;
            }
        }
        Capability(value)
    }

    /// Reconstruct from an already-computed product (e.g. read off the wire
    /// or out of a bootstrap claim). Callers are trusted to have only ever
    /// produced these values via `from_primes`/`take_away`.
    pub fn from_raw(value: u16) -> Self {
        Capability(value.max(1))
    }

    pub fn value(self) -> u16 {
        self.0
    }

    pub fn includes(self, prime: u16) -> bool {
        self.0 % prime == 0
    }

    /// No-op if the capability is already absent.
    pub fn take_away(&mut self, prime: u16) {
        if self.includes(prime) {
            self.0 /= prime;
        }
    }
}

impl Default for Capability {
    fn default() -> Self {
        Capability::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn includes_is_a_single_modulo() {
        let cap = Capability::from_primes(&[CAN_EDIT_CONTENT, CAN_SEE_ALL_EDITOR_EVENTS]);
        assert!(cap.includes(CAN_EDIT_CONTENT));
        assert!(cap.includes(CAN_SEE_ALL_EDITOR_EVENTS));
        assert!(!cap.includes(CAN_SEE_OTHER_CLIENTS));
    }

    #[test]
    fn take_away_is_idempotent_and_monotone() {
        let mut cap = Capability::from_primes(&[CAN_SEE_OTHER_CLIENTS, CAN_SEE_NON_RESTRICTED_EVENTS]);
        cap.take_away(CAN_SEE_OTHER_CLIENTS);
        assert!(!cap.includes(CAN_SEE_OTHER_CLIENTS));
        assert!(cap.includes(CAN_SEE_NON_RESTRICTED_EVENTS));
        // A second take-away of the same prime is a no-op.
        cap.take_away(CAN_SEE_OTHER_CLIENTS);
        assert!(!cap.includes(CAN_SEE_OTHER_CLIENTS));
    }

    #[test]
    fn take_away_of_absent_capability_is_noop() {
        let mut cap = Capability::from_primes(&[CAN_EDIT_CONTENT]);
        let before = cap.value();
        cap.take_away(CAN_SEE_ALL_EDITOR_EVENTS);
        assert_eq!(cap.value(), before);
    }

    #[test]
    fn composition_is_commutative() {
        let a = Capability::from_primes(&[CAN_EDIT_CONTENT, CAN_SEE_OTHER_CLIENTS]);
        let b = Capability::from_primes(&[CAN_SEE_OTHER_CLIENTS, CAN_EDIT_CONTENT]);
        assert_eq!(a, b);
    }

    #[test]
    fn restricted_user_scenario() {
        // Sees non-restricted events, not all-events.
        let cap = Capability::from_primes(&[
            CAN_SEE_OTHER_CLIENTS,
            CAN_SEE_NON_RESTRICTED_EVENTS,
        ]);
        assert!(cap.includes(CAN_SEE_NON_RESTRICTED_EVENTS));
        assert!(!cap.includes(CAN_SEE_ALL_EDITOR_EVENTS));
    }
}
