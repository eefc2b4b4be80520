use std::time::Duration;

use av_reader::audio_format::AudioFormat;
use av_reader::config::ReaderConfig;
use av_reader::convert::RgbConverter;
use av_reader::reader::{PlaybackEvent, VideoReader};

/// Samples per channel handed to the "device" on each audio callback.
const AUDIO_BUFFER_SAMPLES: usize = 1024;

fn main() {
    env_logger::init();

    let url = std::env::args().nth(1).unwrap_or_else(|| "test.mp4".to_string());
    let frame_budget = std::env::args()
        .nth(2)
        .and_then(|n| n.parse().ok())
        .unwrap_or(usize::MAX);

    // =========================================================
    // Open the input and list its streams
    // =========================================================
    let config = ReaderConfig::new(url).set_frame_budget(frame_budget);
    let audio_format = AudioFormat::default();
    let mut reader = VideoReader::open(config.set_audio_format(audio_format)).unwrap();

    println!("=== {} ===", reader.url());
    for stream in reader.streams() {
        println!("  stream {} : {}", stream.index(), stream.stream_type());
    }

    let clock = reader.clock();
    let events = reader.subscribe();
    let has_video = reader.has_video();

    // =========================================================
    // Audio thread: a fake device pulling 1024-sample buffers.
    // It starts with the first video frame and pauses at the end,
    // or plays right away for audio-only inputs.
    // =========================================================
    let audio_thread = reader.take_audio_player().map(|mut player| {
        let rate = reader
            .streams()
            .iter()
            .find_map(|stream| match stream {
                av_reader::stream_info::StreamInfo::Audio { sample_rate, .. } => Some(*sample_rate),
                _ => None,
            })
            .filter(|rate| *rate > 0)
            .unwrap_or(48_000);
        let period = Duration::from_secs_f64(AUDIO_BUFFER_SAMPLES as f64 / f64::from(rate));

        std::thread::spawn(move || {
            let mut pcm = vec![0u8; audio_format.buffer_size(AUDIO_BUFFER_SAMPLES)];
            let ticker = crossbeam_channel::tick(period);
            let mut playing = !has_video;
            let mut callbacks = 0u64;
            let mut silent_bytes = 0usize;

            loop {
                let mut finished = false;
                crossbeam_channel::select! {
                    recv(events) -> event => match event {
                        Ok(PlaybackEvent::FirstFrame) => playing = true,
                        Ok(PlaybackEvent::EndOfStream) | Err(_) => finished = true,
                    },
                    recv(ticker) -> _ => {
                        if playing {
                            let written = player.fill(&mut pcm, clock.now());
                            callbacks += 1;
                            silent_bytes += pcm.len() - written;
                            finished = player.is_finished();
                        }
                    }
                }
                if finished {
                    break;
                }
            }

            println!();
            println!("=== Audio ===");
            println!("  callbacks        : {}", callbacks);
            println!("  silence (bytes)  : {}", silent_bytes);
            println!("  discarded frames : {}", player.discarded_frames());
        })
    });

    // =========================================================
    // Render loop at 60 ticks per second
    // =========================================================
    if has_video {
        let ticker = crossbeam_channel::tick(Duration::from_micros(16_667));
        let mut converter = RgbConverter::new();
        let mut last_frame = None;
        let mut shown = 0u64;

        loop {
            let _ = ticker.recv();
            let info = reader.select_frame(clock.now());

            if info.frame_id != last_frame {
                last_frame = info.frame_id;
                shown += 1;
                if let Some(frame) = reader.current_frame() {
                    match converter.convert_packed(frame) {
                        Ok(rgb) => log::debug!(
                            "frame {:?} pts={:?} at {} dropped={} rgb={} bytes",
                            info.frame_id,
                            info.pts,
                            info.wall_timestamp,
                            info.nb_dropped,
                            rgb.len()
                        ),
                        Err(e) => log::warn!("RGB conversion failed: {e}"),
                    }
                }
            }

            if info.is_last {
                break;
            }
        }

        println!();
        println!("=== Video ===");
        println!("  frames shown   : {}", shown);
        println!("  frames dropped : {}", reader.dropped_frames());
        println!("  elapsed        : {}", clock.now());
    }

    if let Some(handle) = audio_thread {
        if has_video {
            // the reader owns the event sender; dropping it ends the audio loop
            drop(reader);
        }
        let _ = handle.join();
    }
}
