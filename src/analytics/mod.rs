//! Analytics data layer fed by the iframe's `analyticsEvent` messages.

mod gtag;

pub use gtag::{should_load_script, GtagCommand, GtagState, TagManager};
