//! Schedule window: the optional `--sched-start`/`--sched-stop` wall-clock
//! pair that bounds when hashers are allowed to run.

use crate::watchdog::chrono_like::Time;

#[derive(Debug, Clone, Copy)]
pub enum ScheduleWindow {
    /// Mine only after `start`, once per run.
    StartOnly { start: Time },
    /// Quit once `stop` is reached.
    StopOnly { stop: Time },
    /// `start < stop`: mine only inside `[start, stop)`.
    Window { start: Time, stop: Time },
    /// `start > stop`: mine everywhere except `[stop, start)`.
    InvertedWindow { start: Time, stop: Time },
}

impl ScheduleWindow {
    pub fn parse(start: Option<&str>, stop: Option<&str>) -> Result<Option<Self>, String> {
        let start = match start {
            None => None,
            Some(s) => Some(Time::from_hhmm(s).ok_or("invalid --sched-start".to_string())?),
        };
        let stop = match stop {
            None => None,
            Some(s) => Some(Time::from_hhmm(s).ok_or("invalid --sched-stop".to_string())?),
        };

        Ok(match (start, stop) {
            (None, None) => None,
            (Some(start), None) => Some(ScheduleWindow::StartOnly { start }),
            (None, Some(stop)) => Some(ScheduleWindow::StopOnly { stop }),
            (Some(start), Some(stop)) if start.minutes_since_midnight < stop.minutes_since_midnight => {
                Some(ScheduleWindow::Window { start, stop })
            }
            (Some(start), Some(stop)) => Some(ScheduleWindow::InvertedWindow { start, stop }),
        })
    }

    pub fn should_mine(&self, now: Time) -> bool {
        let m = now.minutes_since_midnight;
        match self {
            ScheduleWindow::StartOnly { start } => m >= start.minutes_since_midnight,
            ScheduleWindow::StopOnly { stop } => m < stop.minutes_since_midnight,
            ScheduleWindow::Window { start, stop } => {
                m >= start.minutes_since_midnight && m < stop.minutes_since_midnight
            }
            ScheduleWindow::InvertedWindow { start, stop } => {
                !(m >= stop.minutes_since_midnight && m < start.minutes_since_midnight)
            }
        }
    }

    pub fn is_stop_only(&self) -> bool {
        matches!(self, ScheduleWindow::StopOnly { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(hhmm: &str) -> Time {
        Time::from_hhmm(hhmm).unwrap()
    }

    #[test]
    fn start_only_mines_after_time() {
        let w = ScheduleWindow::parse(Some("09:00"), None).unwrap().unwrap();
        assert!(!w.should_mine(t("08:59")));
        assert!(w.should_mine(t("09:00")));
    }

    #[test]
    fn stop_only_quits_at_time() {
        let w = ScheduleWindow::parse(None, Some("17:00")).unwrap().unwrap();
        assert!(w.should_mine(t("16:59")));
        assert!(!w.should_mine(t("17:00")));
        assert!(w.is_stop_only());
    }

    #[test]
    fn window_mines_only_inside_range() {
        let w = ScheduleWindow::parse(Some("09:00"), Some("17:00")).unwrap().unwrap();
        assert!(!w.should_mine(t("08:00")));
        assert!(w.should_mine(t("12:00")));
        assert!(!w.should_mine(t("18:00")));
    }

    #[test]
    fn inverted_window_mines_outside_range() {
        let w = ScheduleWindow::parse(Some("17:00"), Some("09:00")).unwrap().unwrap();
        assert!(w.should_mine(t("12:00")));
        assert!(w.should_mine(t("20:00")));
        assert!(!w.should_mine(t("02:00")));
    }

    #[test]
    fn no_flags_means_no_window() {
        assert!(ScheduleWindow::parse(None, None).unwrap().is_none());
    }
}
