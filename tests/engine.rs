//! End to end behavior of the engine through its public interface

use dimuse::{
    Args, BUFFER_MUSIC, BUFFER_SFX, BUFFER_SPEECH, Block, BufferInfo, DimuseError, Engine,
    EngineConfig, Flavor, Imuse, Jump, MemorySource, Param, Pool, ScriptEvent, SoundMap,
    SwitchFlags, command::opcode,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fmt(at: u32) -> Block {
    Block::Format {
        offset: at,
        reserved: 0,
        word_size: 16,
        rate: 22_050,
        channels: 2,
    }
}

/// Build an iMUS resource. `blocks` gets the offset at which audio starts.
fn map_sound(blocks: impl Fn(u32) -> Vec<Block>, audio: &[u8]) -> Vec<u8> {
    let at = u32::try_from(SoundMap { blocks: blocks(0) }.data_offset()).unwrap();
    SoundMap { blocks: blocks(at) }.to_resource(audio)
}

/// One region of `len` bytes of 16 bit stereo, then the end
fn plain_sound(len: u32) -> Vec<u8> {
    map_sound(
        |at| {
            vec![
                fmt(at),
                Block::Region {
                    offset: at,
                    length: len,
                },
                Block::Stop { offset: at + len },
            ]
        },
        &vec![0x10; len as usize],
    )
}

fn engine_with(cfg: EngineConfig, sounds: &[(i32, Vec<u8>)]) -> Engine<MemorySource> {
    init();
    let mut src = MemorySource::new();
    for (id, data) in sounds {
        src.insert(*id, data.clone());
    }
    Engine::new(cfg, src)
}

#[test]
fn start_and_query() {
    let cfg = EngineConfig {
        track_count: 4,
        ..EngineConfig::default()
    };
    let mut e = engine_with(cfg, &[(100, plain_sound(40_000))]);
    e.start_sound(100, 50).unwrap();
    assert_eq!(e.get_param(100, Param::Priority), Ok(50));
    assert_eq!(e.get_next_sound(0), 100);
    assert_eq!(e.get_next_sound(100), 0);
    assert_eq!(e.get_param(100, Param::SoundHasStream), Ok(0));
    assert_eq!(e.start_sound(100, 50), Err(DimuseError::AlreadyPlaying));
    assert_eq!(e.start_sound(101, 50), Err(DimuseError::SoundNotFound));
    assert_eq!(e.source().pin_count(100), 1);
    e.stop_sound(100).unwrap();
    assert_eq!(e.source().pin_count(100), 0);
    assert_eq!(e.stop_sound(100), Err(DimuseError::SoundNotFound));
}

#[test]
fn stream_pool_exhaustion() {
    let sounds: Vec<_> = (1..=4).map(|id| (id, plain_sound(40_000))).collect();
    let mut e = engine_with(EngineConfig::default(), &sounds);
    e.source_mut().set_buffer(
        4,
        BufferInfo {
            size: 110_592,
            load_size: 22_528,
            critical_size: 44_032,
        },
    );
    e.start_stream(1, 10, BUFFER_SPEECH).unwrap();
    e.start_stream(2, 10, BUFFER_MUSIC).unwrap();
    e.heartbeat();
    e.start_stream(3, 10, BUFFER_SFX).unwrap();
    assert_eq!(
        e.start_stream(4, 10, 4),
        Err(DimuseError::PoolExhausted(Pool::Stream))
    );
    assert!(e.track(4).is_none());
    assert_eq!(e.playing().len(), 3);
    for id in 1..=3 {
        assert!(e.query_stream(id).is_ok());
        assert_eq!(e.get_param(id, Param::SoundHasStream), Ok(1));
    }
    assert_eq!(e.get_param(2, Param::StreamBufferId), Ok(i32::from(BUFFER_MUSIC)));
    // A group can only stream one sound
    e.stop_sound(3).unwrap();
    assert_eq!(
        e.start_stream(4, 10, BUFFER_MUSIC),
        Err(DimuseError::PoolExhausted(Pool::Stream))
    );
    e.start_stream(4, 10, 4).unwrap();
}

#[test]
fn region_plays_to_stop() {
    let mut e = engine_with(EngineConfig::default(), &[(1, plain_sound(4096))]);
    e.start_sound(1, 10).unwrap();
    assert_eq!(e.track(1).unwrap().dispatch.audio_remaining, 4096);
    // 512 frames of 16 bit stereo per feed
    let out = e.heartbeat().to_vec();
    assert!(out.iter().any(|&b| b != 0));
    assert_eq!(e.track(1).unwrap().dispatch.audio_remaining, 2048);
    e.heartbeat();
    assert!(e.track(1).is_none());
    assert_eq!(e.source().pin_count(1), 0);
}

#[test]
fn snap_fade_to_zero_stops() {
    let mut e = engine_with(EngineConfig::default(), &[(5, plain_sound(40_000))]);
    e.start_sound(5, 10).unwrap();
    e.fade_param(5, Param::Volume, 0, 0).unwrap();
    assert!(e.track(5).is_none());
    assert!(e.playing().is_empty());
}

#[test]
fn empty_marker_trigger_fires_on_anything() {
    let mut e = engine_with(EngineConfig::default(), &[]);
    let mut args = Args::default();
    args[0] = 11;
    e.set_trigger(7, "", 40, args).unwrap();
    e.process_triggers(7, "anything");
    assert_eq!(e.take_events(), [ScriptEvent::Script { opcode: 40, args }]);
    // One shot
    e.process_triggers(7, "anything");
    assert!(e.take_events().is_empty());
}

#[test]
fn eviction_by_priority() {
    let sounds: Vec<_> = (1..=10).map(|id| (id, plain_sound(40_000))).collect();
    let mut e = engine_with(EngineConfig::default(), &sounds);
    // Sound i has priority i - 1
    for id in 1..=9 {
        e.start_sound(id, id - 1).unwrap();
        assert!(e.playing().len() <= 8);
    }
    let mut playing = e.playing().to_vec();
    assert_eq!(playing[0], 9);
    playing.sort_unstable();
    assert_eq!(playing, (2..=9).collect::<Vec<_>>());
    assert_eq!(e.source().pin_count(1), 0);
    // Nothing below priority 1 is left to evict for priority 0
    assert_eq!(
        e.start_sound(10, 0),
        Err(DimuseError::PoolExhausted(Pool::Track))
    );
    assert_eq!(e.source().pin_count(10), 0);
    assert_eq!(e.tracks().list().len(), 8);
    e.stop_all_sounds();
    assert!(e.tracks().list().is_empty());
}

#[test]
fn markers_reach_triggers() {
    let sound = map_sound(
        |at| {
            vec![
                fmt(at),
                Block::Text {
                    offset: at,
                    text: b"chorus\0".to_vec(),
                },
                Block::Region {
                    offset: at,
                    length: 8000,
                },
                Block::Stop { offset: at + 8000 },
            ]
        },
        &[0; 8000],
    );
    let mut e = engine_with(EngineConfig::default(), &[(3, sound)]);
    e.set_trigger(3, "chorus", 0, Args::default()).unwrap();
    e.set_trigger(3, "verse", 0, Args::default()).unwrap();
    e.start_sound(3, 10).unwrap();
    e.heartbeat();
    let events = e.take_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], ScriptEvent::Marker { sound: 3, marker } if marker.as_str() == "chorus"));
    assert_eq!(e.check_trigger(Some(3), "", None), 1);
}

#[test]
fn lip_sync_from_map() {
    let sound = map_sound(
        |at| {
            vec![
                fmt(at),
                Block::Sync {
                    offset: at,
                    data: vec![0, 0, 0x05, 0x03, 10, 0, 0x02, 0x01],
                },
                Block::Region {
                    offset: at,
                    length: 4000,
                },
                Block::Stop { offset: at + 4000 },
            ]
        },
        &[0; 4000],
    );
    let mut e = engine_with(EngineConfig::default(), &[(8, sound)]);
    e.start_sound(8, 10).unwrap();
    assert_eq!(e.lip_sync(8, 0, 0), Ok((3, 5)));
    assert_eq!(e.lip_sync(8, 0, 200), Ok((1, 2)));
    assert_eq!(e.lip_sync(8, 1, 200), Ok((0, 0)));
    assert_eq!(e.lip_sync(8, 9, 0), Err(DimuseError::ParamOutOfRange));
}

#[test]
fn streamed_sound_plays_through() {
    let mut e = engine_with(EngineConfig::default(), &[(2, plain_sound(60_000))]);
    e.start_stream(2, 10, BUFFER_MUSIC).unwrap();
    let mut heard = false;
    let mut beats = 0;
    while e.track(2).is_some() {
        heard |= e.heartbeat().iter().any(|&b| b != 0);
        beats += 1;
        assert!(beats < 50, "stream never ended");
    }
    assert!(heard);
    // 60000 bytes are 15000 frames, about 30 feeds
    assert!(beats >= 29);
    assert_eq!(e.query_stream(2), Err(DimuseError::SoundNotFound));
    // The buffer group is free again
    e.start_stream(2, 10, BUFFER_MUSIC).unwrap();
}

#[test]
fn jump_crossfade_conserves_bytes() {
    let sound = map_sound(
        |at| {
            vec![
                fmt(at),
                Block::Region {
                    offset: at,
                    length: 20_000,
                },
                Block::Jump(Jump {
                    hook_pos: at + 20_000,
                    dest: at,
                    hook_id: 0,
                    fade_ms: 100,
                }),
                Block::Region {
                    offset: at + 20_000,
                    length: 20_000,
                },
                Block::Stop { offset: at + 40_000 },
            ]
        },
        &vec![0x20; 40_000],
    );
    let mut e = engine_with(EngineConfig::default(), &[(6, sound)]);
    e.start_stream(6, 10, BUFFER_MUSIC).unwrap();
    let mut fade_total = None;
    let mut fades_seen = 0;
    for _ in 0..40 {
        e.heartbeat();
        let d = &e.track(6).expect("looping sound ended").dispatch;
        if d.fade.is_some() {
            let total = d.fade_offset + d.fade_remaining;
            assert_eq!(*fade_total.get_or_insert(total), total);
            fades_seen += 1;
        } else if fade_total.is_some() {
            break;
        }
    }
    // 100 ms of 16 bit stereo, in whole frame pairs, rounded down to 6 bytes
    assert_eq!(fade_total, Some(8814));
    assert!(fades_seen >= 2);
}

#[test]
fn switch_stream_crossfades_into_new_sound() {
    let mut e = engine_with(
        EngineConfig::default(),
        &[(1, plain_sound(80_000)), (2, plain_sound(80_000))],
    );
    e.start_stream(1, 10, BUFFER_MUSIC).unwrap();
    e.set_trigger(1, "", 40, Args::default()).unwrap();
    for _ in 0..3 {
        e.heartbeat();
    }
    e.switch_stream(1, 2, 200, SwitchFlags::empty()).unwrap();
    assert!(e.track(1).is_none());
    assert_eq!(e.check_trigger(Some(1), "", None), 0);
    let d = &e.track(2).unwrap().dispatch;
    assert!(d.fade.is_some());
    assert!(d.map.is_none());
    for _ in 0..10 {
        e.heartbeat();
    }
    let d = &e.track(2).unwrap().dispatch;
    assert!(d.fade.is_none());
    assert!(d.map.is_some());
    assert_eq!(
        e.switch_stream(2, 2, 200, SwitchFlags::empty()),
        Err(DimuseError::AlreadyPlaying)
    );
}

#[test]
fn save_and_restore() {
    let sounds = [(1, plain_sound(40_000)), (2, plain_sound(80_000))];
    let mut e = engine_with(EngineConfig::default(), &sounds);
    e.start_sound(1, 20).unwrap();
    e.start_stream(2, 30, BUFFER_MUSIC).unwrap();
    e.set_param(1, Param::Pan, 20).unwrap();
    e.set_hook(2, 4).unwrap();
    for _ in 0..4 {
        e.heartbeat();
    }
    let offsets = [1, 2].map(|id| e.track(id).unwrap().dispatch.current_offset);
    let data = e.save_state();

    let mut restored = engine_with(EngineConfig::default(), &sounds);
    restored.start_sound(2, 5).unwrap();
    restored.load_state(&data).unwrap();
    assert_eq!(restored.playing().as_slice(), e.playing().as_slice());
    assert_eq!(restored.get_param(1, Param::Pan), Ok(20));
    assert_eq!(restored.get_hook(2), Ok(4));
    assert_eq!(restored.source().pin_count(1), 1);
    assert_eq!(restored.source().pin_count(2), 0);
    for (id, offset) in [1, 2].into_iter().zip(offsets) {
        assert_eq!(restored.track(id).unwrap().dispatch.current_offset, offset);
    }
    assert_eq!(restored.get_param(2, Param::SoundHasStream), Ok(1));
    // Both carry on to their ends
    let mut beats = 0;
    while !restored.playing().is_empty() {
        restored.heartbeat();
        beats += 1;
        assert!(beats < 60, "restored sounds never ended");
    }
}

#[test]
fn commands_by_number() {
    let mut e = engine_with(EngineConfig::default(), &[(9, plain_sound(40_000))]);
    let args = |vals: &[i32]| {
        let mut args = Args::default();
        args[..vals.len()].copy_from_slice(vals);
        args
    };
    e.handle_cmd(opcode::START_SOUND, &args(&[9, 60])).unwrap();
    assert_eq!(e.handle_cmd(opcode::GET_PARAM, &args(&[9, 0x500])), Ok(60));
    e.handle_cmd(opcode::SET_PARAM, &args(&[9, 0x600, 30])).unwrap();
    assert_eq!(e.get_param(9, Param::Volume), Ok(30));
    assert_eq!(e.handle_cmd(opcode::SET_GROUP_VOL, &args(&[3, -1])), Ok(127));
    assert_eq!(
        e.handle_cmd(77, &Args::default()),
        Err(DimuseError::UnknownOpcode(77))
    );
    // Stop sound 9 two ticks from now
    e.handle_cmd(opcode::DEFER_COMMAND, &args(&[2, opcode::STOP_SOUND, 9]))
        .unwrap();
    e.heartbeat();
    e.heartbeat();
    assert!(e.track(9).is_none());
}

/// VOC file with a looped block of `len` samples
fn voc_sound(len: usize, looped: bool) -> Vec<u8> {
    let mut out = b"Creative Voice File\x1A".to_vec();
    out.extend_from_slice(&[0x1A, 0x00, 0x0A, 0x01, 0x29, 0x11]);
    if looped {
        out.extend_from_slice(&[6, 2, 0, 0, 0xFF, 0xFF]);
    }
    let size = u32::try_from(len + 2).unwrap().to_le_bytes();
    out.extend_from_slice(&[1, size[0], size[1], size[2], 211, 0]);
    out.extend(std::iter::repeat_n(0xC0, len));
    if looped {
        out.push(7);
    }
    out.push(0);
    out
}

#[test]
fn voc_loops_and_streams() {
    let cfg = EngineConfig::new(Flavor::Voc);
    let mut e = engine_with(cfg, &[(1, voc_sound(700, true)), (2, voc_sound(5000, false))]);
    e.start_sound(1, 10).unwrap();
    e.start_stream(2, 10, BUFFER_SPEECH).unwrap();
    for _ in 0..3 {
        e.heartbeat();
    }
    // 8 bit mono at 22050 Hz: a feed per 512 samples
    assert!(e.track(2).is_some());
    for _ in 0..20 {
        e.heartbeat();
    }
    assert!(e.track(1).is_some());
    assert!(e.track(2).is_none());
}

#[test]
fn locked_front_end() {
    init();
    let mut src = MemorySource::new();
    src.insert(4, plain_sound(4096));
    let imuse = Imuse::new(EngineConfig::default(), src);
    imuse.start_sound(4, 10).unwrap();
    imuse.set_trigger(4, "", 0, Args::default()).unwrap();
    let mut out = Vec::new();
    imuse.heartbeat(&mut out, &mut ());
    assert_eq!(out.len(), 512 * 4);
    assert_eq!(imuse.get_next_sound(0), 4);
    imuse.heartbeat(&mut out, &mut ());
    assert_eq!(imuse.get_next_sound(0), 0);
    assert_eq!(imuse.lock().check_trigger(Some(4), "", None), 0);
}

#[test]
fn marker_before_stop_fires() {
    let sound = map_sound(
        |at| {
            vec![
                fmt(at),
                Block::Region {
                    offset: at,
                    length: 4000,
                },
                Block::Text {
                    offset: at + 4000,
                    text: b"end\0".to_vec(),
                },
                Block::Stop { offset: at + 4000 },
            ]
        },
        &[0; 4000],
    );
    let mut e = engine_with(EngineConfig::default(), &[(2, sound)]);
    e.set_trigger(2, "end", 0, Args::default()).unwrap();
    e.start_sound(2, 10).unwrap();
    e.heartbeat();
    assert!(e.take_events().is_empty());
    // 488 frames left: the marker, then the end, in the same feed
    e.heartbeat();
    assert!(e.track(2).is_none());
    let events = e.take_events();
    assert!(
        matches!(events.as_slice(), [ScriptEvent::Marker { sound: 2, marker }] if marker.as_str() == "end")
    );
}

#[test]
fn marker_trigger_arms_jump_at_same_offset() {
    let sound = map_sound(
        |at| {
            vec![
                fmt(at),
                Block::Region {
                    offset: at,
                    length: 4000,
                },
                Block::Text {
                    offset: at + 4000,
                    text: b"turn\0".to_vec(),
                },
                Block::Jump(Jump {
                    hook_pos: at + 4000,
                    dest: at,
                    hook_id: 5,
                    fade_ms: 0,
                }),
                Block::Region {
                    offset: at + 4000,
                    length: 4000,
                },
                Block::Stop { offset: at + 8000 },
            ]
        },
        &vec![0x10; 8000],
    );
    let mut e = engine_with(EngineConfig::default(), &[(3, sound)]);
    let mut args = Args::default();
    args[0] = 3;
    args[1] = 5;
    e.set_trigger(3, "turn", opcode::SET_HOOK, args).unwrap();
    e.start_sound(3, 10).unwrap();
    let start = e.track(3).unwrap().dispatch.current_offset;
    e.heartbeat();
    e.heartbeat();
    let track = e.track(3).unwrap();
    // 488 frames up to the hook, then 24 from the jump destination
    assert_eq!(track.dispatch.current_offset, start + 24 * 4);
    assert_eq!(track.jump_hook, 0);
    assert_eq!(e.check_trigger(Some(3), "", None), 0);
}

#[test]
fn marker_trigger_changes_volume_mid_feed() {
    let sound = map_sound(
        |at| {
            vec![
                fmt(at),
                Block::Region {
                    offset: at,
                    length: 1024,
                },
                Block::Text {
                    offset: at + 1024,
                    text: b"hush\0".to_vec(),
                },
                Block::Region {
                    offset: at + 1024,
                    length: 4000,
                },
                Block::Stop { offset: at + 5024 },
            ]
        },
        &vec![0x40; 5024],
    );
    let mut e = engine_with(EngineConfig::default(), &[(4, sound)]);
    let mut args = Args::default();
    args[..3].copy_from_slice(&[4, 0x600, 0]);
    e.set_trigger(4, "hush", opcode::SET_PARAM, args).unwrap();
    e.start_sound(4, 10).unwrap();
    let out = e.heartbeat().to_vec();
    // 256 frames of 16 bit stereo before the marker, silence after it
    assert!(out[..256 * 4].iter().any(|&b| b != 0));
    assert!(out[256 * 4..].iter().all(|&b| b == 0));
    assert_eq!(e.get_param(4, Param::Volume), Ok(0));
    assert!(e.track(4).is_some());
}

#[test]
fn many_markers_in_one_feed() {
    let names: Vec<String> = (0..20).map(|i| format!("m{i}")).collect();
    let sound = map_sound(
        |at| {
            let mut blocks = vec![
                fmt(at),
                Block::Region {
                    offset: at,
                    length: 1024,
                },
            ];
            blocks.extend(names.iter().map(|name| Block::Text {
                offset: at + 1024,
                text: format!("{name}\0").into_bytes(),
            }));
            blocks.push(Block::Region {
                offset: at + 1024,
                length: 4000,
            });
            blocks.push(Block::Stop { offset: at + 5024 });
            blocks
        },
        &[0; 5024],
    );
    let mut e = engine_with(EngineConfig::default(), &[(6, sound)]);
    for name in ["m0", "m16", "m19"] {
        e.set_trigger(6, name, 0, Args::default()).unwrap();
    }
    e.start_sound(6, 10).unwrap();
    e.heartbeat();
    let fired: Vec<String> = e
        .take_events()
        .into_iter()
        .map(|event| match event {
            ScriptEvent::Marker { marker, .. } => marker.to_string(),
            ScriptEvent::Script { opcode, .. } => panic!("unexpected script {opcode}"),
        })
        .collect();
    assert_eq!(fired, ["m0", "m16", "m19"]);
    assert!(e.track(6).is_some());
}

#[test]
fn partial_frame_region_ends_sound() {
    let sound = map_sound(
        |at| {
            vec![
                fmt(at),
                Block::Region {
                    offset: at,
                    length: 402,
                },
                Block::Region {
                    offset: at + 402,
                    length: 4000,
                },
                Block::Stop { offset: at + 4402 },
            ]
        },
        &vec![0x10; 4402],
    );
    let mut e = engine_with(EngineConfig::default(), &[(7, sound)]);
    e.start_sound(7, 10).unwrap();
    // 100 whole frames, then 2 bytes that don't make one
    assert!(e.heartbeat().iter().any(|&b| b != 0));
    assert!(e.track(7).is_none());
    assert_eq!(e.source().pin_count(7), 0);
}

#[test]
fn high_pitch_stream_reads_in_chunks() {
    let cfg = EngineConfig::new(Flavor::MapPitched { demo: false });
    let mut e = engine_with(cfg, &[(8, plain_sound(400_000))]);
    e.start_stream(8, 10, BUFFER_MUSIC).unwrap();
    e.set_param(8, Param::Transpose, 4095).unwrap();
    let mut offsets = Vec::new();
    for _ in 0..3 {
        assert!(e.heartbeat().iter().any(|&b| b != 0));
        let track = e.track(8).expect("fast sound stopped");
        offsets.push(track.dispatch.current_offset);
    }
    // Nearly 16 times the 2048 bytes of a feed at normal pitch
    assert!(offsets[2] - offsets[1] > 0x4000);
}
