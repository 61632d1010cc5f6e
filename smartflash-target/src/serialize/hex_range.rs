use serde::{ser::SerializeStruct, Serializer};
use std::ops::Range;

pub(crate) fn serialize<S>(memory_range: &Range<u32>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    // Human-readable formats such as YAML get hex strings, binary formats the plain numbers.
    let human_readable = serializer.is_human_readable();
    let mut state = serializer.serialize_struct("Range", 2)?;
    if human_readable {
        state.serialize_field("start", format!("{:#x}", memory_range.start).as_str())?;
        state.serialize_field("end", format!("{:#x}", memory_range.end).as_str())?;
    } else {
        state.serialize_field("start", &memory_range.start)?;
        state.serialize_field("end", &memory_range.end)?;
    }
    state.end()
}
