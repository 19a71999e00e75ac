//! Small standalone helpers that don't belong to any one component.

pub mod dashmap;

/// Format a `chrono::Duration` the way log lines and introspection output
/// report connection/session ages (spec.md §3 `connectionTime`).
pub fn format_duration(duration: &chrono::Duration) -> String {
    let milliseconds = format!("{:0>3}", duration.num_milliseconds() % 1000);
    let seconds = format!("{:0>2}", duration.num_seconds() % 60);
    let minutes = format!("{:0>2}", duration.num_minutes() % 60);
    let hours = format!("{:0>2}", duration.num_hours() % 24);
    let days = duration.num_days().to_string();
    format!("{days}d {hours}:{minutes}:{seconds}.{milliseconds}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_zero_duration() {
        let d = chrono::Duration::zero();
        assert_eq!(format_duration(&d), "0d 00:00:00.000");
    }
}
