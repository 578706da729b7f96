use chrono::SecondsFormat;
use tickwork_core::duration::format_duration;
use tickwork_scheduler::JobStatus;

const HEADERS: [&str; 6] = ["NAME", "STATE", "SCHEDULE", "LAST RUN", "NEXT RUN", "STATUS"];

/// Render statuses as an aligned plain-text table.
pub fn render_table(statuses: &[JobStatus]) -> String {
    let rows: Vec<[String; 6]> = statuses.iter().map(row).collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_line(&mut out, &HEADERS.map(String::from), &widths);
    for row in &rows {
        push_line(&mut out, row, &widths);
    }
    out
}

pub fn render_json(statuses: &[JobStatus]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(statuses)
}

fn row(status: &JobStatus) -> [String; 6] {
    let stamp = |at: Option<chrono::DateTime<chrono::Utc>>| {
        at.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_else(|| "-".to_string())
    };
    let state = match status.running_for {
        Some(d) => format!("{} {}", status.state, format_duration(d)),
        None => status.state.to_string(),
    };
    [
        status.name.clone(),
        state,
        status.schedule.clone(),
        stamp(status.last_run),
        stamp(status.next_run),
        status.status.clone().unwrap_or_else(|| "-".to_string()),
    ]
}

fn push_line(out: &mut String, cells: &[String; 6], widths: &[usize; 6]) {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join("  ");
    out.push_str(line.trim_end());
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tickwork_scheduler::JobState;

    fn status(name: &str, state: JobState) -> JobStatus {
        JobStatus {
            name: name.to_string(),
            state,
            disabled: state == JobState::IdleDisabled,
            schedule: "every 5s".to_string(),
            last_run: None,
            next_run: Some("2020-01-01T00:00:05Z".parse().unwrap()),
            running_for: None,
            executions: 0,
            status: None,
        }
    }

    #[test]
    fn table_aligns_columns() {
        let mut busy = status("a-much-longer-name", JobState::Running);
        busy.running_for = Some(Duration::from_secs(2));
        busy.executions = 1;
        let table = render_table(&[status("tiny", JobState::IdleEnabled), busy]);

        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        let state_col = lines[0].find("STATE").unwrap();
        assert_eq!(state_col, "a-much-longer-name".len() + 2);
        assert_eq!(lines[1].find("idle-enabled"), Some(state_col));
        assert!(lines[2].contains("running 2s"));
        assert!(lines[1].contains("2020-01-01T00:00:05Z"));
        assert_eq!(lines[2].find("running"), Some(state_col));
    }

    #[test]
    fn json_lists_every_job() {
        let json = render_json(&[status("tiny", JobState::IdleDisabled)]).unwrap();
        let parsed: Vec<JobStatus> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0].state, JobState::IdleDisabled);
        assert!(parsed[0].disabled);
    }
}
