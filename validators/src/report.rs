use serde::Serialize;

/// Script-friendly verdict: the process exit code is the enum value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Healthy,
    Warn,
    Critical,
}

impl Verdict {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Healthy => 0,
            Self::Warn => 1,
            Self::Critical => 2,
        }
    }
}

/// Prints a report as pretty JSON and returns its exit code.
pub fn emit<R: Serialize>(report: &R, verdict: Verdict) -> i32 {
    match serde_json::to_string_pretty(report) {
        Ok(rendered) => println!("{rendered}"),
        Err(err) => eprintln!("report serialization failed: {err}"),
    }
    verdict.exit_code()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_severity() {
        assert_eq!(Verdict::Healthy.exit_code(), 0);
        assert_eq!(Verdict::Warn.exit_code(), 1);
        assert_eq!(Verdict::Critical.exit_code(), 2);
    }
}
