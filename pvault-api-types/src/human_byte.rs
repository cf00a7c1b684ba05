/// A byte count formatted for log lines and status reports.
pub struct HumanByte {
    b: usize,
}

impl std::fmt::Display for HumanByte {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.b < 1024 {
            return write!(f, "{} B", self.b);
        }
        let kb = self.b as f64 / 1024.0;
        if kb < 1024.0 {
            return write!(f, "{:.2} KiB", kb);
        }
        let mb = kb / 1024.0;
        if mb < 1024.0 {
            return write!(f, "{:.2} MiB", mb);
        }
        let gb = mb / 1024.0;
        if gb < 1024.0 {
            return write!(f, "{:.2} GiB", gb);
        }
        let tb = gb / 1024.0;
        write!(f, "{:.2} TiB", tb)
    }
}

impl From<usize> for HumanByte {
    fn from(v: usize) -> Self {
        HumanByte { b: v }
    }
}

impl From<u64> for HumanByte {
    fn from(v: u64) -> Self {
        HumanByte { b: v as usize }
    }
}

#[test]
fn human_byte_formatting() {
    assert_eq!(HumanByte::from(1023usize).to_string(), "1023 B");
    assert_eq!(HumanByte::from(2048usize).to_string(), "2.00 KiB");
    assert_eq!(HumanByte::from(3 * 1024 * 1024usize).to_string(), "3.00 MiB");
}
