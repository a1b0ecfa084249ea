use pf_core::StoreError;
use pf_types::{GenerationError, ValidationError, Warning};
use serde::Serialize;
use serde_json::json;

use super::{EXIT_ERROR, EXIT_REJECTED};

/// Print `json` in JSON mode, otherwise the human rendering.
pub fn emit<T: Serialize>(json_mode: bool, human: impl FnOnce() -> String, json: &T) {
    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(json).unwrap_or_else(|_| "{}".into())
        );
    } else {
        println!("{}", human());
    }
}

pub fn human_issues(errors: &[ValidationError]) -> String {
    let mut out = String::new();
    for e in errors {
        out.push_str(&format!("error {e}\n"));
    }
    out.push_str(&format!("{} error(s)", errors.len()));
    out
}

pub fn human_warnings(warnings: &[Warning]) -> String {
    warnings
        .iter()
        .map(|w| format!("warning [{:?}] {}: {}", w.kind, w.ptr, w.msg))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Report a store failure; validation failures exit 2, anything else is an error.
pub fn store_failure(json_mode: bool, err: StoreError) -> anyhow::Result<i32> {
    let errors = err.validation_errors();
    if errors.is_empty() {
        return Err(err.into());
    }
    emit(
        json_mode,
        || human_issues(errors),
        &json!({"ok": false, "errors": errors}),
    );
    Ok(EXIT_REJECTED)
}

/// Same contract as [`store_failure`] for rendering: an invalid stored template exits 2.
pub fn generation_failure(json_mode: bool, err: GenerationError) -> anyhow::Result<i32> {
    match err {
        GenerationError::Invalid(errors) => {
            emit(
                json_mode,
                || human_issues(&errors),
                &json!({"ok": false, "errors": errors}),
            );
            Ok(EXIT_REJECTED)
        }
        other => Err(other.into()),
    }
}

pub fn exit_for(ok: bool) -> i32 {
    if ok {
        super::EXIT_OK
    } else {
        EXIT_ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pf_types::ValidationCode;

    #[test]
    fn invalid_template_exits_rejected() {
        let err = GenerationError::Invalid(vec![ValidationError::new(
            ValidationCode::MissingTerminalMatchRule,
            "/rules",
            "no terminal match-all rule",
        )]);
        assert_eq!(generation_failure(true, err).unwrap(), EXIT_REJECTED);

        let err = GenerationError::unsupported("/nodes/0/tag", "reserved");
        assert!(generation_failure(true, err).is_err());
    }
}
