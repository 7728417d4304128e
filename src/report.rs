//! Status report forwarding.
//!
//! Reporting is best effort: callers log a failed `report` and move on.
//! Every failure here is a `ReportingFailure`.

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

use crate::{ErrorKind, SeatError, StatusReport};

pub const DEFAULT_REPORT_TIMEOUT: Duration = Duration::from_secs(5);

pub trait ReportSink {
    fn name(&self) -> &'static str;

    fn report(&mut self, venue_id: &str, report: &StatusReport) -> Result<()>;
}

impl<T: ReportSink + ?Sized> ReportSink for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn report(&mut self, venue_id: &str, report: &StatusReport) -> Result<()> {
        (**self).report(venue_id, report)
    }
}

/// JSON body understood by the seat backend.
pub fn report_payload(venue_id: &str, report: &StatusReport) -> Value {
    let cafe_id = match venue_id.parse::<u64>() {
        Ok(id) => json!(id),
        Err(_) => json!(venue_id),
    };
    let status_list: Vec<Value> = report
        .statuses
        .iter()
        .map(|s| json!({ "seatID": s.seat_id, "state": s.state.wire_name() }))
        .collect();
    json!({ "cafeId": cafe_id, "statusList": status_list })
}

fn reporting_failure(message: String) -> anyhow::Error {
    SeatError::new(ErrorKind::ReportingFailure, message).into()
}

/// Reporting endpoints must be http(s) with a host.
pub fn parse_report_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("parse report url '{}'", raw))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(anyhow!(
                "unsupported report scheme '{}'; expected http(s)",
                other
            ))
        }
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(anyhow!("report url '{}' has no host", raw));
    }
    Ok(url)
}

#[derive(Clone, Debug)]
pub struct HttpReportConfig {
    pub url: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

pub struct HttpReportSink {
    config: HttpReportConfig,
    agent: ureq::Agent,
}

impl HttpReportSink {
    pub fn new(config: HttpReportConfig) -> Result<Self> {
        parse_report_url(&config.url)?;
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self { config, agent })
    }
}

impl ReportSink for HttpReportSink {
    fn name(&self) -> &'static str {
        "http"
    }

    fn report(&mut self, venue_id: &str, report: &StatusReport) -> Result<()> {
        let mut request = self.agent.post(&self.config.url);
        if let Some(token) = &self.config.token {
            request = request.set("Authorization", &format!("Bearer {}", token));
        }
        match request.send_json(report_payload(venue_id, report)) {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code, _)) => Err(reporting_failure(format!(
                "{} rejected status report for venue {} with HTTP {}",
                self.config.url, venue_id, code
            ))),
            Err(e) => Err(reporting_failure(format!(
                "failed to reach {}: {}",
                self.config.url, e
            ))),
        }
    }
}

/// Used when no endpoint is configured.
#[derive(Clone, Debug, Default)]
pub struct LogReportSink;

impl ReportSink for LogReportSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn report(&mut self, venue_id: &str, report: &StatusReport) -> Result<()> {
        log::info!("venue {} status: {}", venue_id, report_payload(venue_id, report));
        Ok(())
    }
}
