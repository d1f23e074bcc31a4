/// Domain-routed logging.
///
/// Every runtime log line belongs to one of five domains, carried as the
/// event's *target* (`fb::sys`, `fb::task`, `fb::flow`, `fb::port`,
/// `fb::conf`). Targets keep the domain visible in any stock formatter
/// and make it addressable by the filter, so a single domain can be
/// turned up without drowning in the rest:
///
/// ```text
/// RUST_LOG=info,fb::port=trace flowbench run --demo
/// ```
///
/// Usage: level first, domain second, then ordinary tracing field syntax.
/// Both are bare identifiers, not strings.
///
/// ```ignore
/// fb_log!(info, sys, pool = 64, "engine bootstrap complete");
/// fb_log!(warn, flow, error = %e, "process hook error");
/// fb_log!(debug, port, source = %name, "bound");
/// ```
macro_rules! fb_log {
    (error, $domain:ident, $($field:tt)*) => {
        tracing::error!(target: concat!("fb::", stringify!($domain)), $($field)*)
    };
    (warn, $domain:ident, $($field:tt)*) => {
        tracing::warn!(target: concat!("fb::", stringify!($domain)), $($field)*)
    };
    (info, $domain:ident, $($field:tt)*) => {
        tracing::info!(target: concat!("fb::", stringify!($domain)), $($field)*)
    };
    (debug, $domain:ident, $($field:tt)*) => {
        tracing::debug!(target: concat!("fb::", stringify!($domain)), $($field)*)
    };
    (trace, $domain:ident, $($field:tt)*) => {
        tracing::trace!(target: concat!("fb::", stringify!($domain)), $($field)*)
    };
}
