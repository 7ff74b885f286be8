use chrono::NaiveDateTime;
use serde::Serialize;

use sqmp_sensor::SensorReport;

/// One JSON line per sampling cycle on stdout
#[derive(Debug, Serialize)]
pub struct ReportLine<'a> {
    pub timestamp: NaiveDateTime,
    #[serde(flatten)]
    pub report: &'a SensorReport,
}

impl<'a> ReportLine<'a> {
    pub fn now(report: &'a SensorReport) -> Self {
        Self {
            timestamp: chrono::Local::now().naive_local(),
            report,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
