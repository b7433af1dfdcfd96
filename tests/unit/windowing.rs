//! Window coverage over many ranges and intervals

use chrono::{Days, NaiveDate};
use repo_miner::collector::{split, FetchWindow, WindowError};

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

#[test]
fn test_three_days_daily() {
    let windows: Vec<_> = split(Some(d("2024-01-01")), Some(d("2024-01-03")), 1)
        .unwrap()
        .collect();
    let expected: Vec<_> = ["2024-01-01", "2024-01-02", "2024-01-03"]
        .iter()
        .map(|day| FetchWindow::new(Some(d(day)), Some(d(day))))
        .collect();
    assert_eq!(windows, expected);
}

#[test]
fn test_windows_cover_range_without_gaps_or_overlaps() {
    // Crosses a leap day and a year boundary.
    let starts = [d("2023-12-20"), d("2024-02-27"), d("2024-01-01")];
    for start in starts {
        for length in 0..40u64 {
            let end = start.checked_add_days(Days::new(length)).unwrap();
            for interval in [1u32, 2, 3, 7, 30, 365] {
                let windows: Vec<_> = split(Some(start), Some(end), interval).unwrap().collect();

                assert_eq!(windows.first().unwrap().start, Some(start));
                assert_eq!(windows.last().unwrap().end, Some(end));
                for window in &windows {
                    let (Some(a), Some(b)) = (window.start, window.end) else {
                        panic!("bounded range produced {window}");
                    };
                    assert!(a <= b);
                    assert!(window.days().unwrap() <= u64::from(interval));
                }
                for pair in windows.windows(2) {
                    assert_eq!(pair[0].end.unwrap().succ_opt(), pair[1].start);
                }

                let covered: u64 = windows.iter().map(|w| w.days().unwrap()).sum();
                assert_eq!(covered, length + 1, "{start}..{end} every {interval}");
            }
        }
    }
}

#[test]
fn test_size_hint_matches_window_count() {
    let windows = split(Some(d("2024-01-01")), Some(d("2024-01-31")), 7).unwrap();
    assert_eq!(windows.len(), 5);
    assert_eq!(windows.count(), 5);
}

#[test]
fn test_open_ranges_and_errors() {
    let open: Vec<_> = split(Some(d("2024-01-01")), None, 1).unwrap().collect();
    assert_eq!(open, vec![FetchWindow::new(Some(d("2024-01-01")), None)]);

    let all: Vec<_> = split(None, None, 1).unwrap().collect();
    assert_eq!(all, vec![FetchWindow::unbounded()]);

    assert_eq!(
        split(Some(d("2024-01-02")), Some(d("2024-01-01")), 1).unwrap_err(),
        WindowError::InvalidRange {
            start: d("2024-01-02"),
            end: d("2024-01-01")
        }
    );
    assert_eq!(
        split(Some(d("2024-01-01")), Some(d("2024-01-02")), 0).unwrap_err(),
        WindowError::InvalidInterval
    );
}
