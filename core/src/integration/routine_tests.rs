//! Routine files driven across a fleet over real sockets

use std::time::Duration;

use image::{Rgb, RgbImage};

use crate::config::TimingConfig;
use crate::fleet::InstanceEnd;
use crate::protocol::Frame;
use crate::routine::{Routine, RoutineTask, found_screenshot_name};

use super::test_utils::*;

const ROUTINE: &str = r##"
[[step]]
action = "offset"
ms_per_instance = 20

[[step]]
action = "press"
key = "start"
ms = 5

[[step]]
action = "jitter"
max_ms = 5

[check]
x = 0
y = 0
color = "#39FF14"
"##;

#[cfg(unix)]
#[test]
fn test_routine_fleet_finds_matching_instance() {
    let temp = tempfile::tempdir().unwrap();
    RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]))
        .save(temp.path().join("0.png"))
        .unwrap();
    RgbImage::from_pixel(4, 4, Rgb([0x39, 0xff, 0x14]))
        .save(temp.path().join("1.png"))
        .unwrap();

    let routine = Routine::from_toml(ROUTINE).unwrap();
    routine.validate().unwrap();
    let timings = TimingConfig {
        reset_settle_ms: 0,
        screenshot_settle_ms: 5,
    };
    let task = RoutineTask::new(routine, temp.path(), Duration::from_millis(5), timings);

    let (mut fleet, servers) = sleeper_fleet(2);
    fleet.start_all().unwrap();
    let report = fleet.run(&task);

    assert_eq!(report.found_by, Some(1));
    assert_eq!(report.instances[1], InstanceEnd::Found);
    assert_eq!(report.instances[0], InstanceEnd::Stopped);
    assert_all_torn_down(&fleet);

    let frames = servers[1].wait_for_frames(4, Duration::from_secs(2));
    let start = crate::input::KeyType::Start.bit();
    assert_eq!(&frames[..3], &[
        Frame::KeyState(start),
        Frame::KeyState(0),
        Frame::Screenshot("1.png".to_string()),
    ]);
    let Some(Frame::Screenshot(found)) = frames.last() else {
        panic!("expected a found screenshot, got {:?}", frames);
    };
    assert!(found.starts_with("found-at-attempt-"));

    let probes = servers[0].frames();
    assert!(!probes
        .iter()
        .any(|f| matches!(f, Frame::Screenshot(name) if name.starts_with("found-at"))));
}

#[test]
fn test_found_screenshot_name() {
    assert_eq!(found_screenshot_name(42), "found-at-attempt-42.png");
}
