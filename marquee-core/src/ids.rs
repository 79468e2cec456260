use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// A scheduled screening with its own seat inventory.
    ShowtimeId
);
uuid_id!(
    /// A seat as it exists for one showtime (not the physical seat).
    SeatId
);
uuid_id!(LockId);
uuid_id!(BookingId);
uuid_id!(TicketTypeId);
uuid_id!(SnackId);
uuid_id!(MovieId);
uuid_id!(
    /// Opaque caller token taken from the `X-Session-Id` header.
    ///
    /// It is asserted by the client and never verified server-side, so it
    /// only correlates locks to a caller.
    SessionId
);
