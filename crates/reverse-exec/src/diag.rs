use log::debug;

/// Receives human-readable dumps of reconstruction state. Nothing in the reconstruction depends
/// on what the sink does with them.
pub trait Diagnostics {
    fn report(&mut self, title: &str, body: &str);
}

/// Forwards reports to the `log` facade at debug level.
#[derive(Copy, Clone, Debug, Default)]
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {
    fn report(&mut self, title: &str, body: &str) {
        debug!("\n****{title}\n{body}");
    }
}

/// Discards every report.
#[derive(Copy, Clone, Debug, Default)]
pub struct NullDiagnostics;

impl Diagnostics for NullDiagnostics {
    fn report(&mut self, _title: &str, _body: &str) {}
}
