//! Кодеры переменной ширины для битовых потоков постинг-листов.
//!
//! Четыре класса потоков (id, frequency, length, location) получают по
//! кодеру; выбор — строкой конфигурации: "unary", "gamma", "peg:<λ>".
//! Все кодируемые значения строго положительны: разности возрастающих
//! последовательностей, частоты, ненулевые битовые длины.
//!
//! Контракт кодера:
//! - bits_for(v)            — точная ширина кода v;
//! - append / append_back   — запись в прямой / задний поток, смещение
//!                            продвигается на ширину кода;
//! - get / get_back         — декодирующие двойники; None, если чтение
//!                            вышло бы за total_bits (смещение не меняется).

pub mod bitops;

use anyhow::anyhow;
use std::fmt;
use std::str::FromStr;

/// Кодер одного потока. Long-вариант "peg" — параметризованный
/// экспоненциальный код Голомба с λ младшими битами остатка.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coder {
    Unary,
    Gamma,
    ExpGolomb(u32),
}

/// Строка конфигурации разбирается прямо в Coder.
pub type CoderSpec = Coder;

impl FromStr for Coder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s == "unary" {
            return Ok(Coder::Unary);
        }
        if s == "gamma" {
            return Ok(Coder::Gamma);
        }
        if let Some(rest) = s.strip_prefix("peg:") {
            let lambda: u32 = rest
                .parse()
                .map_err(|_| anyhow!("bad exp-golomb parameter in coder spec '{}'", s))?;
            if lambda > 30 {
                return Err(anyhow!("exp-golomb parameter {} out of range", lambda));
            }
            return Ok(Coder::ExpGolomb(lambda));
        }
        Err(anyhow!("unknown coder spec '{}'", s))
    }
}

impl fmt::Display for Coder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coder::Unary => write!(f, "unary"),
            Coder::Gamma => write!(f, "gamma"),
            Coder::ExpGolomb(l) => write!(f, "peg:{}", l),
        }
    }
}

#[inline]
fn floor_log2(v: u32) -> u32 {
    31 - v.leading_zeros()
}

impl Coder {
    /// Точная ширина кода значения v (v >= 1).
    pub fn bits_for(&self, v: u32) -> usize {
        debug_assert!(v >= 1);
        match *self {
            Coder::Unary => v as usize,
            Coder::Gamma => (2 * floor_log2(v) + 1) as usize,
            Coder::ExpGolomb(lambda) => {
                let q = (v - 1) >> lambda;
                (q + 1 + lambda) as usize
            }
        }
    }

    /// Дописать v в прямой поток начиная с *off; смещение продвигается.
    pub fn append(&self, v: u32, buf: &mut [u32], off: &mut usize) {
        let k = self.bits_for(v);
        self.encode(v, k, |j, bit| bitops::set_bit(buf, *off + j, bit));
        *off += k;
    }

    /// Дописать v в задний поток начиная с *off.
    pub fn append_back(&self, v: u32, buf: &mut [u32], off: &mut usize) {
        let k = self.bits_for(v);
        self.encode(v, k, |j, bit| bitops::set_bit_back(buf, *off + j, bit));
        *off += k;
    }

    /// Прочитать одно значение из прямого потока. None на границе потока.
    pub fn get(&self, buf: &[u32], total_bits: usize, off: &mut usize) -> Option<u32> {
        self.decode(*off, total_bits, |j| bitops::get_bit(buf, j))
            .map(|(v, k)| {
                *off += k;
                v
            })
    }

    /// Прочитать одно значение из заднего потока.
    pub fn get_back(&self, buf: &[u32], total_bits: usize, off: &mut usize) -> Option<u32> {
        self.decode(*off, total_bits, |j| bitops::get_bit_back(buf, j))
            .map(|(v, k)| {
                *off += k;
                v
            })
    }

    // Запись кода v шириной k через set(j, bit), j — позиция внутри кода.
    fn encode<F: FnMut(usize, bool)>(&self, v: u32, k: usize, mut set: F) {
        match *self {
            Coder::Unary => {
                // (v-1) нулей и завершающая единица
                set(k - 1, true);
            }
            Coder::Gamma => {
                let n = floor_log2(v) as usize;
                // n нулей, единица, n младших бит v
                set(n, true);
                for j in 0..n {
                    set(n + 1 + j, (v >> (n - 1 - j)) & 1 != 0);
                }
            }
            Coder::ExpGolomb(lambda) => {
                let lambda = lambda as usize;
                let m = v - 1;
                let q = (m as usize) >> lambda;
                // q нулей, единица, λ бит остатка
                set(q, true);
                for j in 0..lambda {
                    set(q + 1 + j, (m >> (lambda - 1 - j)) & 1 != 0);
                }
            }
        }
    }

    // Чтение одного кода с позиции off; get(j) — абсолютный бит потока.
    fn decode<F: Fn(usize) -> bool>(
        &self,
        off: usize,
        total_bits: usize,
        get: F,
    ) -> Option<(u32, usize)> {
        if off >= total_bits {
            return None;
        }
        match *self {
            Coder::Unary => {
                let mut j = off;
                while j < total_bits && !get(j) {
                    j += 1;
                }
                if j >= total_bits {
                    return None;
                }
                Some(((j - off + 1) as u32, j - off + 1))
            }
            Coder::Gamma => {
                let mut n = 0usize;
                while off + n < total_bits && !get(off + n) {
                    n += 1;
                }
                if off + n >= total_bits || off + 2 * n + 1 > total_bits {
                    return None;
                }
                let mut v = 1u32;
                for j in 0..n {
                    v = (v << 1) | get(off + n + 1 + j) as u32;
                }
                Some((v, 2 * n + 1))
            }
            Coder::ExpGolomb(lambda) => {
                let lambda = lambda as usize;
                let mut q = 0usize;
                while off + q < total_bits && !get(off + q) {
                    q += 1;
                }
                if off + q >= total_bits || off + q + 1 + lambda > total_bits {
                    return None;
                }
                let mut rem = 0u32;
                for j in 0..lambda {
                    rem = (rem << 1) | get(off + q + 1 + j) as u32;
                }
                let v = ((q as u32) << lambda) + rem + 1;
                Some((v, q + 1 + lambda))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(coder: Coder, values: &[u32]) {
        let total: usize = values.iter().map(|&v| coder.bits_for(v)).sum();
        let words = (total + 31) / 32 + 1;

        // прямой поток
        let mut buf = vec![0u32; words];
        let mut off = 0usize;
        for &v in values {
            coder.append(v, &mut buf, &mut off);
        }
        assert_eq!(off, total);
        let mut roff = 0usize;
        for &v in values {
            assert_eq!(coder.get(&buf, total, &mut roff), Some(v), "{:?} v={}", coder, v);
        }
        assert_eq!(coder.get(&buf, total, &mut roff), None);

        // задний поток
        let mut bbuf = vec![0u32; words];
        let mut boff = 0usize;
        for &v in values {
            coder.append_back(v, &mut bbuf, &mut boff);
        }
        let mut broff = 0usize;
        for &v in values {
            assert_eq!(coder.get_back(&bbuf, total, &mut broff), Some(v));
        }
        assert_eq!(coder.get_back(&bbuf, total, &mut broff), None);
    }

    #[test]
    fn unary_roundtrip() {
        roundtrip(Coder::Unary, &[1, 2, 3, 7, 1, 15]);
    }

    #[test]
    fn gamma_roundtrip() {
        roundtrip(Coder::Gamma, &[1, 2, 3, 4, 5, 100, 65535, 1, 1_000_000]);
    }

    #[test]
    fn exp_golomb_roundtrip() {
        for lambda in [0, 1, 3, 6, 9] {
            roundtrip(
                Coder::ExpGolomb(lambda),
                &[1, 2, 3, 17, 64, 65, 1000, 123_456, 1],
            );
        }
    }

    #[test]
    fn bits_for_is_exact() {
        for coder in [Coder::Unary, Coder::Gamma, Coder::ExpGolomb(4)] {
            for v in 1..200u32 {
                let mut buf = vec![0u32; 16];
                let mut off = 0usize;
                coder.append(v, &mut buf, &mut off);
                assert_eq!(off, coder.bits_for(v));
            }
        }
    }

    #[test]
    fn spec_parsing() {
        assert_eq!("unary".parse::<Coder>().unwrap(), Coder::Unary);
        assert_eq!("gamma".parse::<Coder>().unwrap(), Coder::Gamma);
        assert_eq!("peg:6".parse::<Coder>().unwrap(), Coder::ExpGolomb(6));
        assert!("peg:99".parse::<Coder>().is_err());
        assert!("rice".parse::<Coder>().is_err());
        assert_eq!(Coder::ExpGolomb(3).to_string(), "peg:3");
    }

    #[test]
    fn truncated_stream_returns_none() {
        let coder = Coder::Gamma;
        let mut buf = vec![0u32; 2];
        let mut off = 0usize;
        coder.append(100, &mut buf, &mut off);
        // урезаем поток на последнем бите — декодер обязан вернуть None
        let mut roff = 0usize;
        assert_eq!(coder.get(&buf, off - 1, &mut roff), None);
        assert_eq!(roff, 0);
    }
}
