//! Control-context behaviour: tags, commands, album progression, status screen
//!
//! The control tick and the feeding tick are alternated by hand on the test
//! thread, which gives a deterministic interleaving of the two contexts.

mod helpers;

use helpers::{pattern, Rig};
use tagbox_ap::control::{Appliance, Command};
use tagbox_ap::scheduler::ControlTask;
use tagbox_ap::sim::PinMux;
use tagbox_ap::tag::TagRead;
use tagbox_common::PlaybackState;

fn album_rig(tracks: usize, len: usize) -> Rig {
    let rig = Rig::new();
    for n in 1..=tracks {
        rig.add_track(
            &format!("/Music/AlbumA/{:02}.mp3", n),
            pattern(len, n as u8),
        );
    }
    rig
}

/// One control tick followed by one feeding tick
fn step(rig: &mut Rig, app: &mut Appliance) {
    app.tick().unwrap();
    rig.controller.update();
}

#[test]
fn test_presented_tag_starts_album() {
    let mut rig = album_rig(2, 5_000);
    let mut app = rig.appliance(true);

    rig.present_tag("AlbumA");
    step(&mut rig, &mut app);

    assert_eq!(app.album(), Some("AlbumA"));
    assert!(rig.player.is_playing());
    assert_eq!(
        rig.player.current_track().as_deref(),
        Some("/Music/AlbumA/01.mp3")
    );
}

#[test]
fn test_tag_with_album_path_is_accepted() {
    let mut rig = album_rig(1, 1_000);
    let mut app = rig.appliance(true);

    rig.present_tag("/Music/AlbumA");
    step(&mut rig, &mut app);
    assert_eq!(app.album(), Some("AlbumA"));
}

#[test]
fn test_unknown_album_tag_is_ignored() {
    let mut rig = album_rig(1, 1_000);
    let mut app = rig.appliance(true);

    rig.present_tag("NoSuchAlbum");
    step(&mut rig, &mut app);
    assert_eq!(app.album(), None);
    assert!(rig.player.has_ended());
}

#[test]
fn test_removed_tag_stops_playback() {
    let mut rig = album_rig(2, 50_000);
    let mut app = rig.appliance(true);
    rig.present_tag("AlbumA");
    step(&mut rig, &mut app);
    step(&mut rig, &mut app);

    rig.hw.tag_reader.remove();
    app.tick().unwrap();
    assert_eq!(rig.player.state(), PlaybackState::Idle);
    assert_eq!(app.album(), None);

    rig.controller.update();
    assert_eq!(rig.hw.medium.open_handles(), 0);
}

#[test]
fn test_album_advances_to_next_track() {
    let mut rig = album_rig(2, 1_500);
    let mut app = rig.appliance(false);
    rig.present_tag("AlbumA");

    let mut seen = Vec::new();
    for _ in 0..200 {
        step(&mut rig, &mut app);
        if let Some(track) = rig.player.current_track() {
            if seen.last() != Some(&track) {
                seen.push(track);
            }
        }
    }

    assert_eq!(seen, vec!["/Music/AlbumA/01.mp3", "/Music/AlbumA/02.mp3"]);
    assert!(rig.player.has_ended(), "album without looping finishes");
    let mut expected = pattern(1_500, 1);
    expected.extend(pattern(1_500, 2));
    assert_eq!(rig.hw.decoder.stream(), expected);
}

#[test]
fn test_looping_album_wraps_to_first_track() {
    let mut rig = album_rig(2, 1_000);
    let mut app = rig.appliance(true);
    rig.present_tag("AlbumA");

    let mut seen = Vec::new();
    for _ in 0..200 {
        step(&mut rig, &mut app);
        if let Some(track) = rig.player.current_track() {
            if seen.last() != Some(&track) {
                seen.push(track);
            }
        }
        if seen.len() == 3 {
            break;
        }
    }
    assert_eq!(
        seen,
        vec![
            "/Music/AlbumA/01.mp3",
            "/Music/AlbumA/02.mp3",
            "/Music/AlbumA/01.mp3"
        ]
    );
}

#[test]
fn test_unplayable_album_gives_up() {
    let mut rig = album_rig(3, 10_000);
    let mut app = rig.appliance(true);
    rig.hw.medium.fail_reads(true);
    rig.present_tag("AlbumA");

    for _ in 0..50 {
        step(&mut rig, &mut app);
    }
    assert!(rig.player.has_ended());
    assert!(rig.player.last_error().is_some());
    assert!(rig.hw.decoder.stream().is_empty());
}

#[test]
fn test_skip_commands_move_through_album() {
    let mut rig = album_rig(3, 50_000);
    let mut app = rig.appliance(true);
    rig.present_tag("AlbumA");
    step(&mut rig, &mut app);

    app.handle_command(Command::Next).unwrap();
    rig.controller.update();
    assert_eq!(
        rig.player.current_track().as_deref(),
        Some("/Music/AlbumA/02.mp3")
    );

    app.handle_command(Command::Prev).unwrap();
    app.handle_command(Command::Prev).unwrap();
    rig.controller.update();
    assert_eq!(
        rig.player.current_track().as_deref(),
        Some("/Music/AlbumA/03.mp3")
    );
}

#[test]
fn test_pause_and_swapped_tag_for_same_album_resumes() {
    let mut rig = album_rig(1, 50_000);
    let mut app = rig.appliance(true);
    rig.present_tag("AlbumA");
    step(&mut rig, &mut app);

    app.handle_command(Command::Pause).unwrap();
    assert!(rig.player.is_paused());

    // A second tag for the same album replaces the first without a gap
    rig.hw.tag_reader.present(TagRead {
        uid: vec![0x04, 0x99],
        text: Some("AlbumA".to_string()),
    });
    app.tick().unwrap();
    assert!(rig.player.is_playing());
}

#[test]
fn test_volume_commands() {
    let mut rig = album_rig(1, 1_000);
    let mut app = rig.appliance(true);

    app.handle_command("vol 40".parse().unwrap()).unwrap();
    assert_eq!(app.snapshot().volume, 40);
    app.handle_command(Command::VolumeUp).unwrap();
    assert_eq!(app.snapshot().volume, 45);
    app.handle_command(Command::Volume(0)).unwrap();
    app.handle_command(Command::VolumeDown).unwrap();
    assert_eq!(app.snapshot().volume, 0);
    step(&mut rig, &mut app);
}

#[test]
fn test_status_screen_follows_playback() {
    let mut rig = album_rig(1, 50_000);
    let mut app = rig.appliance(true);
    rig.present_tag("AlbumA");
    step(&mut rig, &mut app);
    app.tick().unwrap();

    let frame = rig.hw.display.frames().last().cloned().unwrap();
    assert_eq!(frame.title, "AlbumA");
    assert_eq!(frame.lines[0], "playing 01.mp3");
    assert_eq!(rig.hw.probe.pins(), PinMux::Shared);

    app.handle_command(Command::Stop).unwrap();
    app.tick().unwrap();
    let frame = rig.hw.display.frames().last().cloned().unwrap();
    assert_eq!(frame.title, "Present a tag");
}
