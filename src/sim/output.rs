//! Output sink for `dump` lines. Kept behind a narrow trait rather
//! than inlined `println!` calls so tests can assert on emitted lines
//! without capturing process stdout.

pub trait Sink {
    fn emit(&mut self, line: &str);
}

#[derive(Debug, Default)]
pub struct StdoutSink;

impl Sink for StdoutSink {
    fn emit(&mut self, line: &str) {
        println!("{line}");
    }
}

#[derive(Debug, Default)]
pub struct VecSink {
    pub lines: Vec<String>,
}

impl Sink for VecSink {
    fn emit(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }
}
