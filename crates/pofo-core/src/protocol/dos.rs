//! MS-DOS packed date and time fields.
//!
//! The server stamps files with the 16-bit DOS encoding:
//! date = (year - 1980) << 9 | month << 5 | day,
//! time = hour << 11 | minute << 5 | second / 2.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

const DOS_EPOCH_YEAR: i32 = 1980;
const DOS_MAX_YEAR_OFFSET: i32 = 127;

/// Pack the date part of a timestamp. Years outside 1980..=2107 are clamped.
pub fn encode_date(timestamp: &NaiveDateTime) -> u16 {
    let year = (timestamp.year() - DOS_EPOCH_YEAR).clamp(0, DOS_MAX_YEAR_OFFSET) as u16;
    (year << 9) | ((timestamp.month() as u16) << 5) | timestamp.day() as u16
}

/// Pack the time part of a timestamp (two-second resolution).
pub fn encode_time(timestamp: &NaiveDateTime) -> u16 {
    ((timestamp.hour() as u16) << 11)
        | ((timestamp.minute() as u16) << 5)
        | (timestamp.second() as u16 / 2)
}

/// Unpack a DOS date/time pair. Returns `None` for impossible values.
pub fn decode(date: u16, time: u16) -> Option<NaiveDateTime> {
    let year = DOS_EPOCH_YEAR + (date >> 9) as i32;
    let month = ((date >> 5) & 0x0F) as u32;
    let day = (date & 0x1F) as u32;

    let hour = (time >> 11) as u32;
    let minute = ((time >> 5) & 0x3F) as u32;
    let second = ((time & 0x1F) * 2) as u32;

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}
