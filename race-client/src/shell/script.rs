//! `mongosh` scripts and their replies.
//!
//! Every script connects to one host, evaluates a body that returns a reply
//! document, and prints that document as relaxed Extended JSON on the last
//! line of stdout. String and document literals are embedded as JSON, which
//! is valid JavaScript.
//!
//! `runCommand` in mongosh throws on an `ok: 0` reply. The body runs inside a
//! `try` that turns a thrown server error back into its reply document, so
//! only connection failures make mongosh exit non-zero.

use ddl_race_types::{CommandSpec, Namespace, TypesError};
use serde_json::{json, Value};

use crate::connection::FailPointMode;

/// Wrap a body in the connection preamble and the reply printer.
pub(crate) fn render(host: &str, body: &str) -> String {
    format!(
        "const conn = new Mongo({host});\n\
         const reply = (() => {{\n\
         try {{ {body} }} catch (e) {{\n\
         if (e.code !== undefined) {{\n\
         return {{ok: 0, code: e.code, codeName: e.codeName, errmsg: e.message}};\n\
         }}\n\
         throw e;\n\
         }}\n\
         }})();\n\
         print(EJSON.stringify(reply, {{relaxed: true}}));",
        host = literal(&json!(host)),
        body = body,
    )
}

fn literal(value: &Value) -> String {
    value.to_string()
}

fn run_on(db: &str, command: &Value) -> String {
    format!(
        "return conn.getDB({}).runCommand({});",
        literal(&json!(db)),
        literal(command)
    )
}

/// One of the commands under test, sent to the admin database.
pub(crate) fn command(spec: &CommandSpec) -> String {
    run_on("admin", &spec.to_document())
}

pub(crate) fn ping() -> String {
    run_on("admin", &json!({"ping": 1}))
}

pub(crate) fn insert(ns: &Namespace, docs: &[Value]) -> String {
    run_on(ns.db(), &json!({"insert": ns.coll(), "documents": docs}))
}

pub(crate) fn rename(from: &Namespace, to: &Namespace) -> String {
    run_on(
        "admin",
        &json!({"renameCollection": from.to_string(), "to": to.to_string()}),
    )
}

/// Drop a collection and report whether it existed beforehand.
pub(crate) fn drop(ns: &Namespace) -> String {
    format!(
        "const db = conn.getDB({db});\n\
         const existed = db.getCollectionInfos({{name: {coll}}}, {{nameOnly: true}}).length > 0;\n\
         const dropped = db.runCommand({command});\n\
         dropped.existed = existed;\n\
         return dropped;",
        db = literal(&json!(ns.db())),
        coll = literal(&json!(ns.coll())),
        command = literal(&json!({"drop": ns.coll()})),
    )
}

pub(crate) fn create(ns: &Namespace) -> String {
    run_on(ns.db(), &json!({"create": ns.coll()}))
}

pub(crate) fn delete_all(ns: &Namespace) -> String {
    run_on(
        ns.db(),
        &json!({"delete": ns.coll(), "deletes": [{"q": {}, "limit": 0}]}),
    )
}

pub(crate) fn collection_uuid(ns: &Namespace) -> String {
    format!(
        "const infos = conn.getDB({db}).getCollectionInfos({{name: {coll}}});\n\
         return {{ok: 1, uuid: infos.length > 0 ? infos[0].info.uuid : null}};",
        db = literal(&json!(ns.db())),
        coll = literal(&json!(ns.coll())),
    )
}

pub(crate) fn find_query_analyzer(ns: &Namespace) -> String {
    format!(
        "const doc = conn.getDB(\"config\").queryAnalyzers.findOne({{_id: {ns}}});\n\
         return {{ok: 1, doc: doc}};",
        ns = literal(&json!(ns.to_string())),
    )
}

pub(crate) fn configure_fail_point(name: &str, mode: FailPointMode) -> String {
    run_on(
        "admin",
        &json!({"configureFailPoint": name, "mode": mode.as_str()}),
    )
}

pub(crate) fn wait_for_fail_point(name: &str, times_entered: u64, max_time_ms: u64) -> String {
    run_on(
        "admin",
        &json!({
            "waitForFailPoint": name,
            "timesEntered": times_entered,
            "maxTimeMS": max_time_ms,
        }),
    )
}

/// Decode the reply printed on the last JSON line of a script's stdout.
pub(crate) fn parse_reply(stdout: &str) -> Result<Value, TypesError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .rev()
        .find(|line| line.starts_with('{'))
        .ok_or_else(|| TypesError::MalformedReply(format!("no reply document in output: {:?}", stdout)))?;
    Ok(serde_json::from_str(line)?)
}
