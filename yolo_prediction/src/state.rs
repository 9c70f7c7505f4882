use crate::{
    config::{LabelsConfig, Validatable},
    prediction::ColorLabel,
};
use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};

pub trait State: Send + Sync + 'static {
    fn new(labels_cfg: &LabelsConfig) -> Result<Self, String>
    where
        Self: Sized;
    fn get_labels(&self) -> &Vec<ColorLabel>;
}

#[derive(Debug)]
pub struct ServiceState {
    class_labels: Vec<ColorLabel>,
}

impl State for ServiceState {
    fn new(labels_cfg: &LabelsConfig) -> Result<ServiceState, String> {
        match load_yolov8_labels(&labels_cfg.get_path()) {
            Ok(labels) => {
                tracing::info!("Loaded {} class labels", labels.len());
                Ok(ServiceState {
                    class_labels: labels,
                })
            }
            Err(e) => Err(format!("Failed to load labels: {}", e)),
        }
    }

    fn get_labels(&self) -> &Vec<ColorLabel> {
        &self.class_labels
    }
}

fn parse_channel(value: &str, channel: &str) -> io::Result<u8> {
    value.trim().parse().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid {} value: {}", channel, value.trim()),
        )
    })
}

/// Reads `name,red,green,blue` lines; the line index is the class id.
pub fn load_yolov8_labels(filepath: &Path) -> io::Result<Vec<ColorLabel>> {
    let file = File::open(filepath)?;
    read_labels(io::BufReader::new(file))
}

fn read_labels(reader: impl BufRead) -> io::Result<Vec<ColorLabel>> {
    let mut color_labels = Vec::new();

    for line_result in reader.lines() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split(',').collect();

        if parts.len() == 4 {
            color_labels.push(ColorLabel {
                label: parts[0].trim().to_string(),
                red: parse_channel(parts[1], "red")?,
                green: parse_channel(parts[2], "green")?,
                blue: parse_channel(parts[3], "blue")?,
            });
        } else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid line format: {}", line),
            ));
        }
    }

    Ok(color_labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_labels() {
        let input = "person, 255, 56, 56\nbicycle,255,157,151\n\ncar,255,112,31\n";
        let labels = read_labels(Cursor::new(input)).unwrap();

        assert_eq!(labels.len(), 3);
        assert_eq!(
            labels[0],
            ColorLabel {
                label: "person".to_string(),
                red: 255,
                green: 56,
                blue: 56,
            }
        );
        assert_eq!(labels[2].label, "car");
    }

    #[test]
    fn test_read_labels_rejects_bad_lines() {
        assert!(read_labels(Cursor::new("person,255,0\n")).is_err());
        assert!(read_labels(Cursor::new("person,256,0,0\n")).is_err());
    }
}
