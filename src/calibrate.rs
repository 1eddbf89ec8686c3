use std::io::{self, BufRead, ErrorKind, Write};

use ::power_monitor::{CalibrationOperator, ChannelId, PowerMonitorError, CHANNEL_COUNT};

/// Interactive operator reading answers line by line.
pub struct ConsoleOperator<R: BufRead, W: Write> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> ConsoleOperator<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self, prompt: &str) -> Result<String, PowerMonitorError> {
        write!(self.output, "{prompt}")?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(io::Error::new(ErrorKind::UnexpectedEof, "operator input closed").into());
        }
        Ok(line.trim().to_string())
    }
}

impl<R: BufRead, W: Write> CalibrationOperator for ConsoleOperator<R, W> {
    fn select_channel(&mut self) -> Result<usize, PowerMonitorError> {
        loop {
            let answer = self.ask(&format!("Which CT input are you calibrating? Enter the number (0 - {}): ", CHANNEL_COUNT - 1))?;
            match answer.parse::<usize>() {
                Ok(index) => return Ok(index),
                Err(_) => writeln!(self.output, "Please enter a whole number.")?,
            }
        }
    }

    fn confirm_load(&mut self, channel: ChannelId) -> Result<bool, PowerMonitorError> {
        writeln!(self.output, "Phase calibration for {channel} needs a purely resistive load (a heater, kettle or incandescent bulb).")?;
        loop {
            let answer = self.ask(&format!("Is a resistive load connected to {channel} and running? [y/n]: "))?;
            match answer.to_lowercase().as_str() {
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => writeln!(self.output, "Please answer y or n.")?,
            }
        }
    }

    fn reverse_sensor(&mut self, channel: ChannelId, power_factor: f64) -> Result<(), PowerMonitorError> {
        writeln!(
            self.output,
            "{channel} reads a power factor of {power_factor:.3}, so the sensor is installed backwards."
        )?;
        self.ask("Reverse the CT on the wire and press Enter to continue.")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reprompts_until_answer_is_valid() {
        let input = Cursor::new("three\n3\nmaybe\nY\n\n");
        let mut operator = ConsoleOperator::new(input, Vec::new());

        assert_eq!(operator.select_channel().unwrap(), 3);
        assert!(operator.confirm_load(ChannelId(3)).unwrap());
        operator.reverse_sensor(ChannelId(3), -0.98).unwrap();

        let transcript = String::from_utf8(operator.output).unwrap();
        assert!(transcript.contains("Please enter a whole number."));
        assert!(transcript.contains("Please answer y or n."));
    }

    #[test]
    fn closed_input_is_an_error() {
        let mut operator = ConsoleOperator::new(Cursor::new(""), Vec::new());
        assert!(matches!(
            operator.select_channel(),
            Err(PowerMonitorError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof
        ));
    }
}
