//! Human readable task listing.

use std::fmt::Write;
use std::time::Duration;

use pomo::config::format_duration;
use pomo_ipc::Task;

/// A pomodoro that ran this much longer than planned was probably left
/// unattended.
const OVERRUN: Duration = Duration::from_secs(4 * 60);

/// `ID: [first-start] [duration] [X X . .] [tags] - message`
///
/// Each mark is one pomodoro: `X` completed, `!` overran, `.` not done yet.
pub fn summarize(task: &Task, datetime_format: &str) -> String {
    let start = task
        .pomodoros
        .first()
        .map(|p| p.start.format(datetime_format).to_string())
        .unwrap_or_default();

    let mut marks: Vec<&str> = task
        .pomodoros
        .iter()
        .map(|p| match p.duration().to_std() {
            Ok(took) if took > task.duration + OVERRUN => "!",
            _ => "X",
        })
        .collect();
    let missing = (task.n_pomodoros as usize).saturating_sub(marks.len());
    marks.extend(std::iter::repeat(".").take(missing));

    let mut line = String::new();
    let _ = write!(
        line,
        "{}: [{}] [{}] [{}]",
        task.id.unwrap_or_default(),
        start,
        format_duration(task.duration),
        marks.join(" ")
    );
    if !task.tags.is_empty() {
        let _ = write!(line, " [{}]", task.tags.join(" "));
    }
    let _ = write!(line, " - {}", task.message);
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use pomo_ipc::Pomodoro;

    #[test]
    fn fresh_task() {
        let mut task = Task::new("write report", 3, Duration::from_secs(25 * 60))
            .with_tags(["work", "q3"]);
        task.id = Some(4);
        assert_eq!(
            summarize(&task, "%Y-%m-%d %H:%M"),
            "4: [] [25m] [. . .] [work q3] - write report"
        );
    }

    #[test]
    fn marks_completed_and_overrun_pomodoros() {
        let start = Local.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let mut task = Task::new("read", 3, Duration::from_secs(60));
        task.id = Some(1);
        task.pomodoros = vec![
            Pomodoro::new(start, start + chrono::Duration::seconds(60)),
            Pomodoro::new(start, start + chrono::Duration::minutes(10)),
        ];
        assert_eq!(
            summarize(&task, "%Y-%m-%d %H:%M"),
            "1: [2024-03-01 09:00] [1m] [X ! .] - read"
        );
    }
}
