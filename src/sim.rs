//! In-memory printf target used by the tests.
//!
//! Each line written to the channel is run through a small `printf`
//! interpreter. Arguments below `buffer_param` come from a fixed list;
//! from `buffer_param` on, argument `n` is word `n - buffer_param` of the
//! input line itself, as when the vulnerable buffer lives on the stack.
//! Interpretation stops at the first NUL, but the words behind it are
//! still readable as arguments.

use std::collections::HashMap;
use std::io;

use crate::channel::{find_subsequence, Channel};
use crate::pointer::Endian;

pub struct SimTarget {
    width: usize,
    endian: Endian,
    buffer_param: usize,
    args: Vec<u64>,
    memory: HashMap<u64, u8>,
    outbox: Vec<u8>,
    pub lines: Vec<Vec<u8>>,
}

impl SimTarget {
    pub fn new(width: usize, buffer_param: usize) -> Self {
        let args = (1..buffer_param as u64).map(|n| 0x5500_0000 + n).collect();
        Self {
            width,
            endian: Endian::Little,
            buffer_param,
            args,
            memory: HashMap::new(),
            outbox: Vec::new(),
            lines: Vec::new(),
        }
    }

    pub fn big_endian(mut self) -> Self {
        self.endian = Endian::Big;
        self
    }

    /// Override the value of argument `n` (below `buffer_param`).
    pub fn set_arg(&mut self, n: usize, value: u64) {
        self.args[n - 1] = value;
    }

    /// Map `bytes` at `addr`.
    pub fn poke(&mut self, addr: u64, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            self.memory.insert(addr + i as u64, b);
        }
    }

    pub fn peek(&self, addr: u64, len: usize) -> Vec<u8> {
        (0..len as u64)
            .map(|i| self.memory.get(&(addr + i)).copied().unwrap_or(0))
            .collect()
    }

    fn arg(&self, n: usize, line: &[u8]) -> u64 {
        if n == 0 {
            return 0;
        }
        if n < self.buffer_param {
            return self.args[n - 1];
        }
        let start = (n - self.buffer_param) * self.width;
        let mut word = vec![0u8; self.width];
        for (i, b) in word.iter_mut().enumerate() {
            *b = line.get(start + i).copied().unwrap_or(0);
        }
        let mut buf = [0u8; 8];
        match self.endian {
            Endian::Little => {
                buf[..self.width].copy_from_slice(&word);
                u64::from_le_bytes(buf)
            }
            Endian::Big => {
                buf[8 - self.width..].copy_from_slice(&word);
                u64::from_be_bytes(buf)
            }
        }
    }

    fn store(&mut self, addr: u64, value: u64, bytes: usize) {
        let encoded: Vec<u8> = match self.endian {
            Endian::Little => value.to_le_bytes()[..bytes].to_vec(),
            Endian::Big => value.to_be_bytes()[8 - bytes..].to_vec(),
        };
        self.poke(addr, &encoded);
    }

    fn printf(&mut self, line: &[u8]) -> Vec<u8> {
        let fmt_end = line.iter().position(|&b| b == 0).unwrap_or(line.len());
        let fmt = &line[..fmt_end];
        let mut out = Vec::new();
        let mut next_arg = 1;
        let mut i = 0;

        while i < fmt.len() {
            if fmt[i] != b'%' {
                out.push(fmt[i]);
                i += 1;
                continue;
            }
            i += 1;
            let mut num = 0usize;
            while i < fmt.len() && fmt[i].is_ascii_digit() {
                num = num * 10 + (fmt[i] - b'0') as usize;
                i += 1;
            }
            let (arg_index, field_width) = if i < fmt.len() && fmt[i] == b'$' {
                i += 1;
                (num, 0)
            } else {
                next_arg += 1;
                (next_arg - 1, num)
            };
            let mut h = 0;
            while i < fmt.len() && fmt[i] == b'h' {
                h += 1;
                i += 1;
            }
            let Some(&conv) = fmt.get(i) else { break };
            i += 1;
            let value = self.arg(arg_index, line);
            match conv {
                b'p' if value == 0 => out.extend_from_slice(b"(nil)"),
                b'p' => out.extend_from_slice(format!("{:#x}", value).as_bytes()),
                b's' => {
                    let mut addr = value;
                    while let Some(&b) = self.memory.get(&addr) {
                        if b == 0 {
                            break;
                        }
                        out.push(b);
                        addr += 1;
                    }
                }
                b'c' => {
                    out.extend(std::iter::repeat(b' ').take(field_width.saturating_sub(1)));
                    out.push(value as u8);
                }
                b'n' => {
                    let bytes = match h {
                        0 => 4,
                        1 => 2,
                        _ => 1,
                    };
                    self.store(value, out.len() as u64, bytes);
                }
                b'%' => out.push(b'%'),
                other => out.push(other),
            }
        }
        out
    }
}

impl Channel for SimTarget {
    fn write_line(&mut self, payload: &[u8]) -> io::Result<()> {
        self.lines.push(payload.to_vec());
        let mut out = self.printf(payload);
        out.push(b'\n');
        self.outbox.extend_from_slice(&out);
        Ok(())
    }

    fn read_until(&mut self, delim: &[u8]) -> io::Result<Vec<u8>> {
        match find_subsequence(&self.outbox, delim) {
            Some(pos) => Ok(self.outbox.drain(..pos + delim.len()).collect()),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "target produced no delimiter",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interprets_conversions() {
        let mut sim = SimTarget::new(8, 4);
        sim.poke(0x1000, b"hi\0");
        sim.set_arg(2, 0x1000);
        sim.set_arg(3, 0);
        sim.write_line(b"<%1$p|%2$s|%3$p|%3c|100%%>").unwrap();
        let reply = sim.read_until(b">").unwrap();
        assert_eq!(reply, b"<0x55000001|hi|(nil)|  \x01|100%>");
    }

    #[test]
    fn buffer_words_are_arguments() {
        let mut sim = SimTarget::new(4, 10);
        // word 0 = "%11$", word 1 = "pQQQ", word 2 = 0x41424344
        sim.write_line(b"%11$pQQQ\x44\x43\x42\x41").unwrap();
        assert_eq!(sim.read_until(b"\n").unwrap(), b"0x51515170QQQDCBA\n");
    }

    #[test]
    fn percent_n_widths() {
        let mut sim = SimTarget::new(8, 2);
        sim.set_arg(1, 0x2000);
        sim.poke(0x2000, &[0xff; 8]);
        sim.write_line(b"%5c%1$hhn").unwrap();
        assert_eq!(sim.peek(0x2000, 8), [5, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
        sim.write_line(b"%300c%1$hn").unwrap();
        assert_eq!(sim.peek(0x2000, 3), [0x2c, 0x01, 0xff]);
        sim.write_line(b"%7c%1$n").unwrap();
        assert_eq!(sim.peek(0x2000, 5), [7, 0, 0, 0, 0xff]);
    }

    #[test]
    fn missing_delimiter_does_not_block() {
        let mut sim = SimTarget::new(8, 2);
        sim.write_line(b"no end here").unwrap();
        assert!(sim.read_until(b"foozlefu").is_err());
    }
}
