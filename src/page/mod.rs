//! The host page: its URL parameters and the navigation effects the iframe can request.

pub mod navigation;
pub mod params;
pub mod signature;

pub use navigation::{
    apply_to_params, apply_url_params, compose_title, open_url_target, HostPage, WindowTarget,
};
pub use params::{set_search_param, PageParams, DEFAULT_LANGUAGE, SUPPORTED_LANGUAGES};
pub use signature::{verify_org, OrgVerifier, PublicKeyJwk};
