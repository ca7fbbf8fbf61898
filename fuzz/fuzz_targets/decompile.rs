#![no_main]

use libfuzzer_sys::fuzz_target;
use smxscope::{emitter::render, Decompiler, DecompilerOptions, Program};

fuzz_target!(|data: &[u8]| {
    let program = Program::builder()
        .code(data.to_vec())
        .function("fuzz", 0)
        .build();
    let mut decompiler = Decompiler::with_options(program, DecompilerOptions::new());
    let decompilation = decompiler.run();
    let _ = render(decompiler.program(), &decompilation);
});
