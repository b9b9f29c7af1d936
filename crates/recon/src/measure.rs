use std::io;

use serde::Serialize;

/// Writer that only counts bytes.
#[derive(Debug, Default)]
struct ByteCounter {
    size: usize,
}

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.size += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Length in bytes of `value` serialized as compact JSON, without building the string.
pub fn measure_json_size<T: Serialize + ?Sized>(value: &T) -> Result<usize, serde_json::Error> {
    let mut counter = ByteCounter::default();
    serde_json::to_writer(&mut counter, value)?;
    Ok(counter.size)
}

/// Same as [`measure_json_size`] for pretty-printed output.
pub fn measure_json_size_pretty<T: Serialize + ?Sized>(
    value: &T,
) -> Result<usize, serde_json::Error> {
    let mut counter = ByteCounter::default();
    serde_json::to_writer_pretty(&mut counter, value)?;
    Ok(counter.size)
}
