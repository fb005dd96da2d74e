#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_wire::{AgentServerMessage, Frame, FrameReader};

fn drain(reader: &mut FrameReader, frames: &mut Vec<Frame>) -> bool {
    loop {
        match reader.next_frame() {
            Ok(Some(frame)) => frames.push(frame),
            Ok(None) => return false,
            Err(_) => return true,
        }
    }
}

fuzz_target!(|data: &[u8]| {
    // The reader must yield the same frame sequence regardless of how the
    // byte stream is chunked. The split point is taken from the input.
    let split = data.first().copied().unwrap_or(0) as usize % data.len().max(1);

    let mut whole_frames = Vec::new();
    let mut whole = FrameReader::new();
    whole.extend(data);
    let whole_errored = drain(&mut whole, &mut whole_frames);

    let mut chunked_frames = Vec::new();
    let mut chunked = FrameReader::new();
    chunked.extend(&data[..split]);
    let mut chunked_errored = drain(&mut chunked, &mut chunked_frames);
    if !chunked_errored {
        chunked.extend(&data[split..]);
        chunked_errored = drain(&mut chunked, &mut chunked_frames);
    }

    assert_eq!(whole_frames, chunked_frames);
    assert_eq!(whole_errored, chunked_errored);

    // Decoding any complete message payload must never panic.
    for frame in whole_frames {
        if let Frame::Message(payload) = frame {
            let _ = AgentServerMessage::decode(&payload);
        }
    }
});
