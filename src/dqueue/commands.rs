//! DATAQUEUE_OPEN, DATAQUEUE_CONTROL and DATAQUEUE_CLOSE.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::com::{
    AckSize, CmdSize, CommandEntry, DATAQUEUE_CLOSE, DATAQUEUE_CONTROL, DATAQUEUE_OPEN, Request,
    Response,
};
use crate::device::Device;
use crate::device::layout::DATA_QUEUE_MAX;
use crate::dqueue::{is_monitor_queue, queue_biu};
use crate::{Error, Result};

pub(crate) const COMMANDS: &[CommandEntry<Device>] = &[
    CommandEntry {
        code: DATAQUEUE_OPEN,
        name: "DATAQUEUE_OPEN",
        handler: open,
        // id, host queue size, execution key
        cmd_size: CmdSize::words(3),
        ack_size: AckSize::words(3),
    },
    CommandEntry {
        code: DATAQUEUE_CONTROL,
        name: "DATAQUEUE_CONTROL",
        handler: control,
        cmd_size: CmdSize::words(2),
        ack_size: AckSize::words(0),
    },
    CommandEntry {
        code: DATAQUEUE_CLOSE,
        name: "DATAQUEUE_CLOSE",
        handler: close,
        cmd_size: CmdSize::words(1),
        ack_size: AckSize::words(0),
    },
];

fn open(dev: &mut Device, req: &Request, rsp: &mut Response) -> Result<()> {
    let id = req.word(0);
    let biu = queue_biu(id);
    let hs = is_monitor_queue(id) && biu < dev.bius.len() && dev.board.is_hs(biu);
    let opened = dev
        .queues
        .open(id, hs, &mut dev.shared, &dev.shared_layout)?;
    rsp.push(0);
    rsp.push(opened.offset);
    rsp.push(opened.size);
    Ok(())
}

fn control(dev: &mut Device, req: &Request, _rsp: &mut Response) -> Result<()> {
    let id = req.word(0);
    let mode = req.word(1);
    if id >= DATA_QUEUE_MAX as u32 {
        return Err(Error::InvalidId);
    }
    let ring = dev.monitor_ring(queue_biu(id))?;
    dev.queues.control(
        id,
        mode,
        &ring,
        &mut dev.gram,
        &mut dev.shared,
        &dev.shared_layout,
        &dev.tr,
    )?;
    Ok(())
}

fn close(dev: &mut Device, req: &Request, _rsp: &mut Response) -> Result<()> {
    dev.queues
        .close(req.word(0), &mut dev.shared, &dev.shared_layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::com::SYS_PING;
    use crate::device::layout::SysCb;
    use crate::device::testing::{self, run};
    use crate::dqueue::{
        CTRL_FLUSH, CTRL_START, CTRL_STOP, DataQueueHeader, STATUS_OVERFLOW, STATUS_START,
    };
    use crate::ram::MemIo;

    #[test]
    fn open_reports_queue_placement() {
        let (mut dev, _) = testing::device();
        let reply = run(&mut dev, DATAQUEUE_OPEN, &[0, 0x1000, 0], 44);
        assert_eq!(reply.ack.error, 0);
        let slot = dev.shared_layout.data_queue(0).unwrap();
        assert_eq!(reply.words, [0, slot.header, slot.size]);
        assert!(dev.queues.is_open(0));
    }

    #[test]
    fn ids_are_range_checked() {
        let (mut dev, _) = testing::device();
        let reply = run(&mut dev, DATAQUEUE_OPEN, &[10, 0, 0], 44);
        assert_eq!(reply.ack.error, Error::DataQueueIdNotInRange.code());
        let reply = run(&mut dev, DATAQUEUE_CONTROL, &[10, CTRL_START], 32);
        assert_eq!(reply.ack.error, Error::InvalidId.code());
        let reply = run(&mut dev, DATAQUEUE_CLOSE, &[10], 32);
        assert_eq!(reply.ack.error, Error::InvalidId.code());
    }

    #[test]
    fn start_needs_an_open_queue() {
        let (mut dev, _) = testing::device();
        let reply = run(&mut dev, DATAQUEUE_CONTROL, &[0, CTRL_START], 32);
        assert_eq!(reply.ack.error, Error::BufferNotAllocated.code());
        let reply = run(&mut dev, DATAQUEUE_CONTROL, &[0, CTRL_STOP], 32);
        assert_eq!(reply.ack.error, 0);
        let reply = run(&mut dev, DATAQUEUE_CLOSE, &[0], 32);
        assert_eq!(reply.ack.error, 0);
    }

    #[test]
    fn start_stop_close() {
        let (mut dev, _) = testing::device();
        run(&mut dev, DATAQUEUE_OPEN, &[9, 0, 0], 44);
        let slot = dev.shared_layout.data_queue(9).unwrap();
        let status = |dev: &Device| {
            dev.shared
                .read_u32(slot.header + DataQueueHeader::status_offset())
                .unwrap()
        };

        assert_eq!(run(&mut dev, DATAQUEUE_CONTROL, &[9, CTRL_START], 32).ack.error, 0);
        assert_ne!(status(&dev) & STATUS_START, 0);
        assert_eq!(run(&mut dev, DATAQUEUE_CONTROL, &[9, CTRL_FLUSH], 32).ack.error, 0);
        assert_eq!(run(&mut dev, DATAQUEUE_CONTROL, &[9, CTRL_STOP], 32).ack.error, 0);
        assert_eq!(status(&dev) & STATUS_START, 0);

        let reply = run(&mut dev, DATAQUEUE_CONTROL, &[9, 7], 32);
        assert_eq!(reply.ack.error, Error::InvalidMode.code());

        assert_eq!(run(&mut dev, DATAQUEUE_CLOSE, &[9], 32).ack.error, 0);
        assert_eq!(status(&dev), 0);
    }

    #[test]
    fn flush_overflow_stays_in_queue_status() {
        let (mut dev, _) = testing::device();
        run(&mut dev, DATAQUEUE_OPEN, &[0, 0, 0], 44);
        run(&mut dev, DATAQUEUE_CONTROL, &[0, CTRL_START], 32);
        let slot = dev.shared_layout.data_queue(0).unwrap();
        let layout = dev.layout(0).unwrap().clone();

        // Triggered monitor reporting its own overflow, 0x20 bytes captured
        dev.gram
            .write_u32(layout.cb + SysCb::msw_offset(), 0x0005_0000)
            .unwrap();
        let mstp = dev.tr.to_gram(0, layout.bm_buf).unwrap();
        dev.gram.write_u32(layout.cb + SysCb::mstp_offset(), mstp).unwrap();
        let fill = dev.tr.to_gram(0, layout.bm_buf + 0x20).unwrap();
        dev.gram.write_u32(layout.cb + SysCb::mbfp_offset(), fill).unwrap();

        let reply = run(&mut dev, DATAQUEUE_CONTROL, &[0, CTRL_FLUSH], 32);
        assert_eq!(reply.ack.error, 0);
        let status = dev
            .shared
            .read_u32(slot.header + DataQueueHeader::status_offset())
            .unwrap();
        assert_ne!(status & STATUS_OVERFLOW, 0);

        let reply = run(&mut dev, SYS_PING, &[0], 36);
        assert_eq!(reply.ack.error, 0);
    }
}
