use crate::adapter::Adapter;

/// Adapter with no storage behind it. Every operation takes the trait's
/// default: listings are empty, `exists` is false, mutations succeed and do
/// nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAdapter;

impl Adapter for NullAdapter {}
