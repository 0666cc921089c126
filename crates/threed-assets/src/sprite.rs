// SPDX-License-Identifier: CEPL-1.0
//! Sprite sheet blobs.
//!
//! Layout (little-endian, offsets from the start of the blob):
//!
//! ```text
//! header   tid:u16 pad:u16[3] vertices_offset:u32 infos_offset:u32 groups_offset:u32
//! vertices count:u16 pad:u16[7]  then count x f32[16]  (px py tu tv per corner)
//! infos    count:u16 pad:u16[3]  then count x {texture_index group_index pad pad: u16, bounding}
//! groups   count:u16 pad:u16[3]  then count x {frame_start frame_count pad pad: u16, bounding}
//! bounding circle_offset_x circle_offset_y circle_radius circle_radius_squared: u32,
//!          crop_w crop_h w h: u16
//! ```
use crate::{AssetError, AssetRoot};
use bytemuck::{Pod, Zeroable};
use std::mem::size_of;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct RectVertices {
    pub corners: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BoundingInfo {
    pub circle_offset_x: u32,
    pub circle_offset_y: u32,
    pub circle_radius: u32,
    pub circle_radius_squared: u32,
    pub crop_w: u16,
    pub crop_h: u16,
    pub w: u16,
    pub h: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RectInfo {
    pub texture_index: u16,
    pub group_index: u16,
    pub bounding: BoundingInfo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpriteGroup {
    pub frame_start: u16,
    pub frame_count: u16,
    pub bounding: BoundingInfo,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RawHeader {
    tid: u16,
    pad: [u16; 3],
    vertices_offset: u32,
    infos_offset: u32,
    groups_offset: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RawVerticesHeader {
    count: u16,
    pad: [u16; 7],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RawCountHeader {
    count: u16,
    pad: [u16; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RawEntry {
    a: u16,
    b: u16,
    pad: [u16; 2],
    bounding: BoundingInfo,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpriteSheet {
    pub texture_id: u16,
    pub frames: Vec<RectVertices>,
    pub infos: Vec<RectInfo>,
    pub groups: Vec<SpriteGroup>,
}

/// Converts a record read straight from the blob into host byte order.
/// Swapping is its own inverse, so the same call also encodes.
trait FromLe: Pod {
    fn from_le(self) -> Self;
}

impl FromLe for RawHeader {
    fn from_le(self) -> Self {
        Self {
            tid: u16::from_le(self.tid),
            pad: self.pad,
            vertices_offset: u32::from_le(self.vertices_offset),
            infos_offset: u32::from_le(self.infos_offset),
            groups_offset: u32::from_le(self.groups_offset),
        }
    }
}

impl FromLe for RawVerticesHeader {
    fn from_le(self) -> Self {
        Self {
            count: u16::from_le(self.count),
            pad: self.pad,
        }
    }
}

impl FromLe for RawCountHeader {
    fn from_le(self) -> Self {
        Self {
            count: u16::from_le(self.count),
            pad: self.pad,
        }
    }
}

impl FromLe for BoundingInfo {
    fn from_le(self) -> Self {
        Self {
            circle_offset_x: u32::from_le(self.circle_offset_x),
            circle_offset_y: u32::from_le(self.circle_offset_y),
            circle_radius: u32::from_le(self.circle_radius),
            circle_radius_squared: u32::from_le(self.circle_radius_squared),
            crop_w: u16::from_le(self.crop_w),
            crop_h: u16::from_le(self.crop_h),
            w: u16::from_le(self.w),
            h: u16::from_le(self.h),
        }
    }
}

impl FromLe for RawEntry {
    fn from_le(self) -> Self {
        Self {
            a: u16::from_le(self.a),
            b: u16::from_le(self.b),
            pad: self.pad,
            bounding: self.bounding.from_le(),
        }
    }
}

impl FromLe for RectVertices {
    fn from_le(self) -> Self {
        Self {
            corners: self
                .corners
                .map(|c| c.map(|v| f32::from_bits(u32::from_le(v.to_bits())))),
        }
    }
}

/// Start of the records following a section header at `offset`.
fn body_offset<H>(blob: &[u8], offset: usize, what: &'static str) -> Result<usize, AssetError> {
    offset
        .checked_add(size_of::<H>())
        .ok_or(AssetError::Truncated {
            what,
            offset,
            need: size_of::<H>(),
            len: blob.len(),
        })
}

fn read<T: FromLe>(blob: &[u8], offset: usize, what: &'static str) -> Result<T, AssetError> {
    let need = size_of::<T>();
    let bytes = offset
        .checked_add(need)
        .and_then(|end| blob.get(offset..end))
        .ok_or(AssetError::Truncated {
            what,
            offset,
            need,
            len: blob.len(),
        })?;
    Ok(bytemuck::pod_read_unaligned::<T>(bytes).from_le())
}

fn read_array<T: FromLe>(
    blob: &[u8],
    offset: usize,
    count: usize,
    what: &'static str,
) -> Result<Vec<T>, AssetError> {
    let stride = size_of::<T>();
    let need = stride.saturating_mul(count);
    if offset.checked_add(need).map_or(true, |end| end > blob.len()) {
        return Err(AssetError::Truncated {
            what,
            offset,
            need,
            len: blob.len(),
        });
    }
    (0..count)
        .map(|i| read(blob, offset + i * stride, what))
        .collect()
}

impl SpriteSheet {
    pub fn parse(blob: &[u8]) -> Result<Self, AssetError> {
        let header: RawHeader = read(blob, 0, "header")?;

        let v_off = header.vertices_offset as usize;
        let vh: RawVerticesHeader = read(blob, v_off, "vertices header")?;
        let frames = read_array::<RectVertices>(
            blob,
            body_offset::<RawVerticesHeader>(blob, v_off, "vertices")?,
            vh.count as usize,
            "vertices",
        )?;

        let i_off = header.infos_offset as usize;
        let ih: RawCountHeader = read(blob, i_off, "infos header")?;
        let infos = read_array::<RawEntry>(
            blob,
            body_offset::<RawCountHeader>(blob, i_off, "infos")?,
            ih.count as usize,
            "infos",
        )?
        .into_iter()
        .map(|e| RectInfo {
            texture_index: e.a,
            group_index: e.b,
            bounding: e.bounding,
        })
        .collect::<Vec<_>>();

        let g_off = header.groups_offset as usize;
        let gh: RawCountHeader = read(blob, g_off, "groups header")?;
        let groups = read_array::<RawEntry>(
            blob,
            body_offset::<RawCountHeader>(blob, g_off, "groups")?,
            gh.count as usize,
            "groups",
        )?
        .into_iter()
        .map(|e| SpriteGroup {
            frame_start: e.a,
            frame_count: e.b,
            bounding: e.bounding,
        })
        .collect::<Vec<_>>();

        for (group, g) in groups.iter().enumerate() {
            let start = g.frame_start as usize;
            let end = start + g.frame_count as usize;
            if end > frames.len() {
                return Err(AssetError::FrameRange {
                    group,
                    start,
                    end,
                    frames: frames.len(),
                });
            }
        }
        for (rect, info) in infos.iter().enumerate() {
            if info.group_index as usize >= groups.len() {
                return Err(AssetError::GroupIndex {
                    rect,
                    group_index: info.group_index,
                    groups: groups.len(),
                });
            }
        }

        tracing::debug!(
            "sprite sheet tid={} frames={} infos={} groups={}",
            header.tid,
            frames.len(),
            infos.len(),
            groups.len()
        );

        Ok(Self {
            texture_id: header.tid,
            frames,
            infos,
            groups,
        })
    }

    pub fn load(root: &AssetRoot, file: &str) -> Result<Self, AssetError> {
        let bytes = root.read(&root.sprite_path(file))?;
        Self::parse(&bytes)
    }

    /// Frames of one animation group, already range-checked by `parse`.
    pub fn group_frames(&self, group: usize) -> Option<&[RectVertices]> {
        let g = self.groups.get(group)?;
        let start = g.frame_start as usize;
        self.frames.get(start..start + g.frame_count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounding(w: u16) -> BoundingInfo {
        BoundingInfo {
            circle_offset_x: 4,
            circle_offset_y: 5,
            circle_radius: 6,
            circle_radius_squared: 36,
            crop_w: w,
            crop_h: w,
            w,
            h: w,
        }
    }

    fn frame(x: f32) -> RectVertices {
        RectVertices {
            corners: [
                [x, 0.0, 0.0, 0.0],
                [x + 8.0, 0.0, 0.5, 0.0],
                [x + 8.0, 8.0, 0.5, 1.0],
                [x, 8.0, 0.0, 1.0],
            ],
        }
    }

    /// Lays sections out back to back, the way the asset builder does.
    fn blob(frames: &[RectVertices], infos: &[(u16, u16)], groups: &[(u16, u16)]) -> Vec<u8> {
        let header_len = size_of::<RawHeader>();
        let v_off = header_len;
        let i_off = v_off + size_of::<RawVerticesHeader>() + frames.len() * 64;
        let g_off = i_off + size_of::<RawCountHeader>() + infos.len() * size_of::<RawEntry>();

        let mut out = Vec::new();
        out.extend_from_slice(bytemuck::bytes_of(
            &RawHeader {
                tid: 7,
                pad: [0; 3],
                vertices_offset: v_off as u32,
                infos_offset: i_off as u32,
                groups_offset: g_off as u32,
            }
            .from_le(),
        ));
        out.extend_from_slice(bytemuck::bytes_of(
            &RawVerticesHeader {
                count: frames.len() as u16,
                pad: [0; 7],
            }
            .from_le(),
        ));
        for f in frames {
            out.extend_from_slice(bytemuck::bytes_of(&f.from_le()));
        }
        for section in [infos, groups] {
            out.extend_from_slice(bytemuck::bytes_of(
                &RawCountHeader {
                    count: section.len() as u16,
                    pad: [0; 3],
                }
                .from_le(),
            ));
            for &(a, b) in section {
                out.extend_from_slice(bytemuck::bytes_of(
                    &RawEntry {
                        a,
                        b,
                        pad: [0; 2],
                        bounding: bounding(16),
                    }
                    .from_le(),
                ));
            }
        }
        out
    }

    #[test]
    fn record_sizes_match_format() {
        assert_eq!(size_of::<RawHeader>(), 20);
        assert_eq!(size_of::<RawVerticesHeader>(), 16);
        assert_eq!(size_of::<RawCountHeader>(), 8);
        assert_eq!(size_of::<BoundingInfo>(), 24);
        assert_eq!(size_of::<RawEntry>(), 32);
        assert_eq!(size_of::<RectVertices>(), 64);
    }

    #[test]
    fn parses_sections() {
        let frames = [frame(0.0), frame(8.0), frame(16.0)];
        let data = blob(&frames, &[(0, 1), (0, 0)], &[(0, 1), (1, 2)]);
        let sheet = SpriteSheet::parse(&data).unwrap();

        assert_eq!(sheet.texture_id, 7);
        assert_eq!(sheet.frames, frames);
        assert_eq!(sheet.infos[0].group_index, 1);
        assert_eq!(sheet.infos[1].bounding, bounding(16));
        assert_eq!(sheet.groups[1].frame_start, 1);
        assert_eq!(sheet.group_frames(1).unwrap(), &frames[1..3]);
        assert!(sheet.group_frames(2).is_none());
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let data = blob(&[frame(0.0), frame(1.0)], &[], &[(0, 2)]);
        for cut in [0, 10, 30, 60] {
            assert!(
                matches!(
                    SpriteSheet::parse(&data[..cut]),
                    Err(AssetError::Truncated { .. })
                ),
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn offsets_past_the_end_are_rejected() {
        let mut data = blob(&[frame(0.0)], &[], &[]);
        data[12..16].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            SpriteSheet::parse(&data),
            Err(AssetError::Truncated {
                what: "infos header",
                ..
            })
        ));
    }

    #[test]
    fn fields_are_read_little_endian() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0x0102u16.to_le_bytes());
        bytes.extend_from_slice(&[0; 6]);
        bytes.extend_from_slice(&0x0a0b_0c0du32.to_le_bytes());
        bytes.extend_from_slice(&20u32.to_le_bytes());
        bytes.extend_from_slice(&0x1122_3344u32.to_le_bytes());
        let h: RawHeader = read(&bytes, 0, "header").unwrap();
        assert_eq!(h.tid, 0x0102);
        assert_eq!(h.vertices_offset, 0x0a0b_0c0d);
        assert_eq!(h.infos_offset, 20);
        assert_eq!(h.groups_offset, 0x1122_3344);

        let corners: Vec<u8> = (0..16).flat_map(|_| 1.5f32.to_le_bytes()).collect();
        let v: RectVertices = read(&corners, 0, "vertices").unwrap();
        assert_eq!(v.corners, [[1.5; 4]; 4]);
    }

    #[test]
    fn section_offsets_near_the_limit_do_not_overflow() {
        assert!(matches!(
            body_offset::<RawCountHeader>(&[], usize::MAX - 2, "groups"),
            Err(AssetError::Truncated { what: "groups", .. })
        ));
        let mut data = blob(&[frame(0.0)], &[], &[]);
        data[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            SpriteSheet::parse(&data),
            Err(AssetError::Truncated {
                what: "vertices header",
                ..
            })
        ));
    }

    #[test]
    fn group_range_is_checked() {
        let data = blob(&[frame(0.0)], &[], &[(0, 2)]);
        assert!(matches!(
            SpriteSheet::parse(&data),
            Err(AssetError::FrameRange { group: 0, end: 2, .. })
        ));
    }

    #[test]
    fn info_group_index_is_checked() {
        let data = blob(&[frame(0.0)], &[(0, 3)], &[(0, 1)]);
        assert!(matches!(
            SpriteSheet::parse(&data),
            Err(AssetError::GroupIndex { group_index: 3, .. })
        ));
    }
}
