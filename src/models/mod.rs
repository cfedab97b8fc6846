pub mod access;
pub mod visitor;

pub use access::{
    parse_expiry, BlacklistEntry, BlacklistRequest, WhitelistEntry, WhitelistRequest,
};
pub use visitor::{
    CreatedVisit, DailyAggregate, NewVisitorDay, PresenceEntry, VisitorDayRecord,
};
