/*!
    Capture timestamps.
*/

/**
    Capture timestamp of a frame, in nanoseconds.

    Hardware codecs take presentation timestamps in microseconds and encoded
    images report capture time in milliseconds. Both conversions round to the
    nearest unit, and the millisecond value is derived from the already
    rounded microsecond value.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /**
        Create a timestamp from nanoseconds.
    */
    #[inline]
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /**
        Create a timestamp from microseconds.
    */
    #[inline]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros * 1_000)
    }

    /**
        Create a timestamp from milliseconds.
    */
    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1_000_000)
    }

    /**
        Returns the raw value in nanoseconds.
    */
    #[inline]
    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    /**
        Returns the timestamp rounded to the nearest microsecond.
    */
    #[inline]
    pub const fn rounded_micros(self) -> i64 {
        (self.0 + 500) / 1_000
    }

    /**
        Returns the timestamp rounded to the nearest millisecond.
    */
    #[inline]
    pub const fn rounded_millis(self) -> i64 {
        (self.rounded_micros() + 500) / 1_000
    }
}

impl From<i64> for Timestamp {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Timestamp> for i64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}
