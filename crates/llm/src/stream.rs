//! StreamState, StreamTranslator and the upstream SSE reframer (spec §4.3, §4.5).

pub(crate) mod reframer;
pub(crate) mod state;
pub(crate) mod translator;
