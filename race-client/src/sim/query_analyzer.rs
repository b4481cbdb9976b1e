//! Simulated `configureQueryAnalyzer`.

use ddl_race_types::{CommandFailure, ErrorCode, Namespace, QueryAnalyzerDoc, SamplingMode};
use serde_json::{json, Value};

use super::{SimEvent, SimServer, Step};

/// Highest accepted `samplesPerSecond`.
pub(crate) const MAX_SAMPLES_PER_SECOND: f64 = 50.0;

fn validate_rate(mode: SamplingMode, samples_per_second: Option<f64>) -> Result<(), CommandFailure> {
    match (mode, samples_per_second) {
        (SamplingMode::Full, Some(rate)) if rate > 0.0 && rate <= MAX_SAMPLES_PER_SECOND => Ok(()),
        (SamplingMode::Full, Some(rate)) => Err(CommandFailure::new(
            ErrorCode::InvalidOptions,
            format!(
                "'samplesPerSecond' must be greater than 0 and at most {}, got {}",
                MAX_SAMPLES_PER_SECOND, rate
            ),
        )),
        (SamplingMode::Full, None) => Err(CommandFailure::new(
            ErrorCode::InvalidOptions,
            "'samplesPerSecond' must be specified when 'mode' is \"full\"",
        )),
        (SamplingMode::Off, Some(_)) => Err(CommandFailure::new(
            ErrorCode::InvalidOptions,
            "'samplesPerSecond' must not be specified when 'mode' is \"off\"",
        )),
        (SamplingMode::Off, None) => Ok(()),
    }
}

fn configuration(doc: &QueryAnalyzerDoc) -> Value {
    match doc.samples_per_second {
        Some(rate) => json!({"mode": doc.mode.as_str(), "samplesPerSecond": rate}),
        None => json!({"mode": doc.mode.as_str()}),
    }
}

impl SimServer {
    pub(super) async fn configure_query_analyzer(
        &self,
        ns: &Namespace,
        mode: SamplingMode,
        samples_per_second: Option<f64>,
    ) -> Step<Value> {
        validate_rate(mode, samples_per_second)?;
        self.yield_for_work().await;

        let _ddl = self.ddl_lock(ns).lock_owned().await;
        self.ensure_up(self.data_host)?;
        let uuid = self.resolve(ns, None)?;

        match mode {
            SamplingMode::Full => {
                let doc = QueryAnalyzerDoc {
                    ns: ns.clone(),
                    coll_uuid: uuid,
                    mode,
                    samples_per_second,
                };
                let new_configuration = configuration(&doc);
                let old = self.catalog().upsert_query_analyzer(doc);
                self.record(SimEvent::QueryAnalyzerWritten {
                    ns: ns.clone(),
                    uuid,
                });
                tracing::debug!(%ns, %uuid, ?samples_per_second, "query sampling enabled");

                let mut reply = json!({"ok": 1, "newConfiguration": new_configuration});
                if let (Some(old), Some(obj)) = (old, reply.as_object_mut()) {
                    obj.insert("oldConfiguration".into(), configuration(&old));
                }
                Ok(reply)
            }
            SamplingMode::Off => {
                let removed = self.catalog().remove_query_analyzer(ns);
                let Some(old) = removed else {
                    return Err(CommandFailure::new(
                        ErrorCode::IllegalOperation,
                        format!(
                            "attempted to disable query sampling for {} but query sampling was not active",
                            ns
                        ),
                    )
                    .into());
                };
                self.record(SimEvent::QueryAnalyzerRemoved { ns: ns.clone() });
                tracing::debug!(%ns, "query sampling disabled");
                Ok(json!({
                    "ok": 1,
                    "newConfiguration": {"mode": "off"},
                    "oldConfiguration": configuration(&old),
                }))
            }
        }
    }
}
