use crate::db;
use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Grading,
    Promotion,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "grading" => Some(Self::Grading),
            "promotion" => Some(Self::Promotion),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Grading => "setup.grading",
            Self::Promotion => "setup.promotion",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grading => json!({
            "autoComputeFinal": true
        }),
        SetupSection::Promotion => json!({
            "passingFinal": grading::DEFAULT_PASSING_FINAL
        }),
    }
}

/// Saved values merged over the section defaults, so new keys pick up their
/// defaults in older workspaces.
fn effective_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let (Some(cur), Some(saved)) = (current.as_object_mut(), saved.as_object()) {
            for (k, v) in saved {
                cur.insert(k.clone(), v.clone());
            }
        }
    }
    Ok(current)
}

pub fn auto_compute_final(conn: &Connection) -> bool {
    effective_section(conn, SetupSection::Grading)
        .ok()
        .and_then(|v| v.get("autoComputeFinal").and_then(|v| v.as_bool()))
        .unwrap_or(true)
}

pub fn passing_final(conn: &Connection) -> f64 {
    effective_section(conn, SetupSection::Promotion)
        .ok()
        .and_then(|v| v.get("passingFinal").and_then(|v| v.as_f64()))
        .unwrap_or(grading::DEFAULT_PASSING_FINAL)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(section) = req
        .params
        .get("section")
        .and_then(|v| v.as_str())
        .and_then(SetupSection::parse)
    else {
        return err(
            &req.id,
            "bad_params",
            "section must be one of: grading, promotion",
            None,
        );
    };

    match effective_section(conn, section) {
        Ok(values) => ok(&req.id, json!({ "section": section.key(), "values": values })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(section) = req
        .params
        .get("section")
        .and_then(|v| v.as_str())
        .and_then(SetupSection::parse)
    else {
        return err(
            &req.id,
            "bad_params",
            "section must be one of: grading, promotion",
            None,
        );
    };

    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch object", None);
    };

    let mut current = match effective_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Only keys known to the section's defaults are accepted, and each value
    // must carry the same JSON type as its default.
    let defaults = default_section(section);
    for (k, v) in patch {
        let Some(expected) = defaults.get(k) else {
            return err(
                &req.id,
                "bad_params",
                format!("unknown setup key: {}", k),
                Some(json!({ "section": section.key() })),
            );
        };
        let type_ok = match expected {
            Value::Bool(_) => v.is_boolean(),
            Value::Number(_) => v.is_number(),
            Value::String(_) => v.is_string(),
            _ => false,
        };
        if !type_ok {
            return err(
                &req.id,
                "validation_failed",
                format!("setup key {} has the wrong type", k),
                Some(json!({ "section": section.key(), "key": k })),
            );
        }
        current[k.as_str()] = v.clone();
    }

    if let Some(passing) = current.get("passingFinal").and_then(|v| v.as_f64()) {
        if !grading::score_in_range(passing) {
            return err(
                &req.id,
                "validation_failed",
                "passingFinal must be within [0, 100]",
                Some(json!({ "passingFinal": passing })),
            );
        }
    }

    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "section": section.key(), "values": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
