use std::fmt;
use std::ops::Neg;
use std::time::Duration;

use tokio::time::Instant;

/// Horizonte usado quando `now + ttl` não cabe no relógio monotônico.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// Time-to-live com sinal, em nanossegundos.
///
/// Zero ou negativo é válido: a entrada nasce expirada e some na próxima
/// leitura ou no próximo `prune`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ttl(i64);

impl Ttl {
    pub const ZERO: Ttl = Ttl(0);

    pub const fn from_nanos(nanos: i64) -> Self {
        Ttl(nanos)
    }

    pub const fn from_millis(millis: i64) -> Self {
        Ttl(millis.saturating_mul(1_000_000))
    }

    pub const fn from_secs(secs: i64) -> Self {
        Ttl(secs.saturating_mul(1_000_000_000))
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    /// Instante absoluto de expiração a partir de `now`.
    pub fn deadline(self, now: Instant) -> Instant {
        let magnitude = Duration::from_nanos(self.0.unsigned_abs());
        if self.0 >= 0 {
            now.checked_add(magnitude)
                .or_else(|| now.checked_add(FAR_FUTURE))
                .unwrap_or_else(|| reachable_after(now))
        } else {
            // `now` já conta como expirado
            now.checked_sub(magnitude).unwrap_or(now)
        }
    }
}

/// Instante futuro alcançável a partir de `now`, reduzindo o passo até caber.
fn reachable_after(now: Instant) -> Instant {
    let mut step = FAR_FUTURE;
    while !step.is_zero() {
        if let Some(t) = now.checked_add(step) {
            return t;
        }
        step /= 2;
    }
    now
}

impl From<Duration> for Ttl {
    fn from(d: Duration) -> Self {
        Ttl(i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
    }
}

impl Neg for Ttl {
    type Output = Ttl;

    fn neg(self) -> Ttl {
        Ttl(self.0.saturating_neg())
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}
