#![no_main]

use harmoniq_pipe::line::{sanitize, split_command, Fields};
use harmoniq_pipe::LineSplitter;
use libfuzzer_sys::fuzz_target;

const MAX_LINE: usize = 256;

fuzz_target!(|data: &[u8]| {
    let Some((&chunk, stream)) = data.split_first() else {
        return;
    };
    let chunk = usize::from(chunk).max(1);

    let mut whole = Vec::new();
    let mut splitter = LineSplitter::new(MAX_LINE);
    splitter.push(stream, |line| whole.push(line));
    splitter.finish();

    let mut pieces = Vec::new();
    for piece in stream.chunks(chunk) {
        splitter.push(piece, |line| pieces.push(line));
    }
    splitter.finish();
    assert_eq!(whole, pieces);

    for line in whole.into_iter().flatten() {
        assert!(!sanitize(&line).contains('\n'));
        let (opcode, rest) = split_command(&line);
        assert!(!opcode.contains(' '));
        let mut fields = Fields::new(rest);
        while fields.next_str().is_ok() {}
        let _ = fields.rest();
    }
});
