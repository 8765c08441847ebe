//! DS3231 temperature-compensated RTC over I2C
//!
//! Time is kept in 24-hour mode in the 2000-2099 century. Alarm 1 is used
//! as the wake source, matched on date, hour, minute and second, with its
//! interrupt routed to the INT/SQW pin.

use embedded_hal::i2c::I2c;

use super::RtcDevice;
use crate::calendar::{DateTime, SECS_PER_DAY, from_bcd, to_bcd};
use crate::error::Fault;

pub const DS3231_ADDR: u8 = 0x68;

mod reg {
    pub const SECONDS: u8 = 0x00;
    pub const ALARM1_SECONDS: u8 = 0x07;
    pub const CONTROL: u8 = 0x0E;
    pub const STATUS: u8 = 0x0F;
}

const HOUR_12H: u8 = 1 << 6;
const HOUR_PM: u8 = 1 << 5;
const CONTROL_INTCN: u8 = 1 << 2;
const CONTROL_A2IE: u8 = 1 << 1;
const CONTROL_A1IE: u8 = 1 << 0;
const STATUS_OSF: u8 = 1 << 7;
const STATUS_A2F: u8 = 1 << 1;
const STATUS_A1F: u8 = 1 << 0;

pub struct Ds3231<I> {
    i2c: I,
}

impl<I: I2c> Ds3231<I> {
    pub fn new(i2c: I) -> Self {
        Self { i2c }
    }

    pub fn release(self) -> I {
        self.i2c
    }

    fn read_regs(&mut self, start: u8, buf: &mut [u8]) -> Result<(), Fault> {
        self.i2c
            .write_read(DS3231_ADDR, &[start], buf)
            .map_err(Fault::from_i2c)
    }

    fn write_regs(&mut self, start: u8, data: &[u8]) -> Result<(), Fault> {
        let mut frame = [0u8; 8];
        let len = data.len().min(frame.len() - 1);
        frame[0] = start;
        frame[1..=len].copy_from_slice(&data[..len]);
        self.i2c
            .write(DS3231_ADDR, &frame[..=len])
            .map_err(Fault::from_i2c)
    }

    fn read_reg(&mut self, reg: u8) -> Result<u8, Fault> {
        let mut buf = [0u8; 1];
        self.read_regs(reg, &mut buf)?;
        Ok(buf[0])
    }

    /// True when the oscillator stopped since the time was last set, meaning
    /// the time registers cannot be trusted.
    pub fn oscillator_stopped(&mut self) -> Result<bool, Fault> {
        Ok(self.read_reg(reg::STATUS)? & STATUS_OSF != 0)
    }

    pub fn datetime(&mut self) -> Result<DateTime, Fault> {
        let mut raw = [0u8; 7];
        self.read_regs(reg::SECONDS, &mut raw)?;
        decode_time(&raw).ok_or(Fault::ClockUnavailable)
    }

    /// Set the time and clear the oscillator-stop flag.
    pub fn set_time(&mut self, secs: u32) -> Result<(), Fault> {
        let dt = DateTime::from_unix(secs);
        if !(2000..=2099).contains(&dt.year) {
            return Err(Fault::ClockUnavailable);
        }

        // 1970-01-01 was a Thursday; the register counts 1..=7 from Sunday.
        let weekday = ((secs / SECS_PER_DAY + 4) % 7) as u8 + 1;
        let raw = [
            to_bcd(dt.second),
            to_bcd(dt.minute),
            to_bcd(dt.hour),
            weekday,
            to_bcd(dt.day),
            to_bcd(dt.month),
            to_bcd((dt.year - 2000) as u8),
        ];
        self.write_regs(reg::SECONDS, &raw)?;

        let status = self.read_reg(reg::STATUS)?;
        self.write_regs(reg::STATUS, &[status & !STATUS_OSF])
    }
}

fn decode_time(raw: &[u8; 7]) -> Option<DateTime> {
    let second = from_bcd(raw[0] & 0x7F)?;
    let minute = from_bcd(raw[1] & 0x7F)?;
    let hour = if raw[2] & HOUR_12H != 0 {
        let h12 = from_bcd(raw[2] & 0x1F)?;
        let pm = raw[2] & HOUR_PM != 0;
        match (h12, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, false) => h,
            (h, true) => h + 12,
        }
    } else {
        from_bcd(raw[2] & 0x3F)?
    };
    let day = from_bcd(raw[4] & 0x3F)?;
    let month = from_bcd(raw[5] & 0x1F)?;
    let year = 2000 + from_bcd(raw[6])? as u16;

    Some(DateTime {
        year,
        month,
        day,
        hour,
        minute,
        second,
    })
}

impl<I: I2c> RtcDevice for Ds3231<I> {
    fn read_time(&mut self) -> Result<u32, Fault> {
        if self.oscillator_stopped()? {
            log::warn!("DS3231 oscillator stop flag set, time invalid");
            return Err(Fault::ClockUnavailable);
        }
        self.datetime()?.to_unix().ok_or(Fault::ClockUnavailable)
    }

    fn set_alarm(&mut self, at: u32) -> Result<(), Fault> {
        let dt = DateTime::from_unix(at);
        // A1M1..A1M4 clear and DY/DT clear: match date, hour, minute, second.
        let alarm = [
            to_bcd(dt.second),
            to_bcd(dt.minute),
            to_bcd(dt.hour),
            to_bcd(dt.day),
        ];
        self.write_regs(reg::ALARM1_SECONDS, &alarm)?;

        let status = self.read_reg(reg::STATUS)?;
        self.write_regs(reg::STATUS, &[status & !(STATUS_A1F | STATUS_A2F)])?;

        let control = self.read_reg(reg::CONTROL)?;
        let control = (control | CONTROL_INTCN | CONTROL_A1IE) & !CONTROL_A2IE;
        self.write_regs(reg::CONTROL, &[control])?;

        log::debug!(
            "alarm set for {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            dt.year,
            dt.month,
            dt.day,
            dt.hour,
            dt.minute,
            dt.second
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockI2cBus, RegisterFile};

    fn rtc() -> (Ds3231<MockI2cBus<RegisterFile>>, RegisterFile) {
        let regs = RegisterFile::new(0x13);
        let bus = MockI2cBus::new(DS3231_ADDR, regs.clone());
        (Ds3231::new(bus), regs)
    }

    #[test]
    fn test_set_then_read_time() {
        let (mut rtc, regs) = rtc();
        regs.set(reg::STATUS, STATUS_OSF);

        // 2024-02-29 12:34:56, a Thursday
        rtc.set_time(1_709_210_096).unwrap();
        assert_eq!(regs.get(0x00), 0x56);
        assert_eq!(regs.get(0x02), 0x12);
        assert_eq!(regs.get(0x03), 5);
        assert_eq!(regs.get(0x06), 0x24);
        assert_eq!(regs.get(reg::STATUS) & STATUS_OSF, 0);

        assert_eq!(rtc.read_time(), Ok(1_709_210_096));
    }

    #[test]
    fn test_oscillator_stop_is_unavailable() {
        let (mut rtc, regs) = rtc();
        rtc.set_time(1_709_210_096).unwrap();
        regs.set(reg::STATUS, STATUS_OSF);
        assert_eq!(rtc.read_time(), Err(Fault::ClockUnavailable));
    }

    #[test]
    fn test_twelve_hour_mode_decoded() {
        let (mut rtc, regs) = rtc();
        rtc.set_time(1_709_210_096).unwrap();
        // 12h mode, PM, 2 o'clock
        regs.set(0x02, HOUR_12H | HOUR_PM | 0x02);
        assert_eq!(rtc.datetime().unwrap().hour, 14);
    }

    #[test]
    fn test_garbage_registers_are_unavailable() {
        let (mut rtc, regs) = rtc();
        rtc.set_time(1_709_210_096).unwrap();
        regs.set(0x05, 0x13); // month 13
        assert_eq!(rtc.read_time(), Err(Fault::ClockUnavailable));
    }

    #[test]
    fn test_alarm_programming() {
        let (mut rtc, regs) = rtc();
        regs.set(reg::STATUS, STATUS_A1F | STATUS_A2F);
        regs.set(reg::CONTROL, CONTROL_A2IE);

        rtc.set_alarm(1_709_210_096).unwrap();
        assert_eq!(regs.get(0x07), 0x56);
        assert_eq!(regs.get(0x08), 0x34);
        assert_eq!(regs.get(0x09), 0x12);
        assert_eq!(regs.get(0x0A), 0x29);
        assert_eq!(regs.get(reg::STATUS) & (STATUS_A1F | STATUS_A2F), 0);
        assert_eq!(
            regs.get(reg::CONTROL),
            CONTROL_INTCN | CONTROL_A1IE
        );
    }

    #[test]
    fn test_bus_error_maps_to_timeout() {
        let (mut rtc, _regs) = rtc();
        let mut bus = rtc.release();
        bus.set_online(false);
        let mut rtc = Ds3231::new(bus);
        assert_eq!(rtc.read_time(), Err(Fault::BusTimeout));
    }
}
